//! sliding window (C9): fixed-length windows of `size`, starting every
//! `slide` (`slide <= size`), first-item anchored (§9.OQ2).
//!
//! A single event loop owns the active-window map — no per-window timers.
//! Membership is inclusive on `start`, exclusive on `end`: `start <= t <
//! end`. An item may belong to more than one active window at once; each
//! success with arrival timestamp `t` belongs to exactly `⌈size/slide⌉`
//! windows, modulo truncation at the stream's start and end (§8).

use super::window_metadata;
use crate::cancel::CancelToken;
use crate::clock::{duration_to_nanos_saturating, Clock, Ticker, Timestamp};
use crate::error::{ConfigError, StreamResult};
use crate::result::Result;
use crate::stage::{channel, Stage, StreamReceiver, StreamSender};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Windows of length `size`, a new one starting every `slide`, anchored to
/// the first item's arrival time.
pub struct Sliding<T> {
    name: &'static str,
    size: Duration,
    slide: Duration,
    clock: Arc<dyn Clock>,
    _marker: std::marker::PhantomData<T>,
}

impl<T> Sliding<T> {
    /// Creates a new `sliding` window stage. Rejects a zero `size`, a zero
    /// `slide`, or `slide > size` at construction.
    pub fn new(
        name: &'static str,
        size: Duration,
        slide: Duration,
        clock: Arc<dyn Clock>,
    ) -> StreamResult<Self> {
        if size.is_zero() {
            return Err(ConfigError::NonPositiveWindowSize);
        }
        if slide.is_zero() || slide > size {
            return Err(ConfigError::InvalidSlide { slide, size });
        }
        Ok(Self {
            name,
            size,
            slide,
            clock,
            _marker: std::marker::PhantomData,
        })
    }
}

enum Event<T> {
    Cancelled,
    Tick,
    Input(core::result::Result<Result<T>, crossbeam_channel::RecvError>),
}

/// Returns every window-start-index `k` (0-based from `anchor`) for which
/// `anchor + k*slide <= t < anchor + k*slide + size`, as nanosecond deltas
/// from `anchor`.
fn covering_starts(delta_ns: u64, size_ns: u64, slide_ns: u64) -> impl Iterator<Item = u64> {
    let upper = delta_ns / slide_ns;
    let lower = if delta_ns >= size_ns {
        (delta_ns - size_ns) / slide_ns + 1
    } else {
        0
    };
    (lower..=upper).map(move |k| k * slide_ns)
}

impl<T> Stage for Sliding<T>
where
    T: Clone + Send + 'static,
{
    type In = T;
    type Out = Vec<Result<T>>;

    fn process(
        self: Box<Self>,
        cancel_signal: CancelToken,
        input: StreamReceiver<Self::In>,
    ) -> StreamReceiver<Self::Out> {
        let Self { name, size, slide, clock, .. } = *self;
        let (tx, rx): (StreamSender<Vec<Result<T>>>, StreamReceiver<Vec<Result<T>>>) = channel();

        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut anchor: Option<Timestamp> = None;
                let mut windows: BTreeMap<Timestamp, Vec<Result<T>>> = BTreeMap::new();
                let mut ticker: Option<Ticker> = None;

                let emit_closed = |windows: &mut BTreeMap<Timestamp, Vec<Result<T>>>, now: Timestamp, force_all: bool| {
                    let mut closed_starts = Vec::new();
                    for &start in windows.keys() {
                        if force_all || start + size <= now {
                            closed_starts.push(start);
                        }
                    }
                    let mut out = Vec::with_capacity(closed_starts.len());
                    for start in closed_starts {
                        let items = windows.remove(&start).unwrap_or_default();
                        let end = start + size;
                        out.push(Result::Success {
                            value: items,
                            metadata: window_metadata(start, end, size, "sliding").with(
                                crate::metadata::keys::WINDOW_SLIDE,
                                slide,
                            ),
                        });
                    }
                    out
                };

                loop {
                    let event = match &ticker {
                        Some(t) => crossbeam_channel::select! {
                            recv(cancel_signal.gate()) -> _ => Event::Cancelled,
                            recv(input) -> msg => Event::Input(msg),
                            recv(t.receiver()) -> _ => Event::Tick,
                        },
                        None => crossbeam_channel::select! {
                            recv(cancel_signal.gate()) -> _ => Event::Cancelled,
                            recv(input) -> msg => Event::Input(msg),
                        },
                    };

                    match event {
                        Event::Cancelled => {
                            if let Some(t) = ticker.take() {
                                t.stop();
                            }
                            break;
                        }
                        Event::Tick => {
                            let now = clock.now();
                            for window in emit_closed(&mut windows, now, false) {
                                if tx.send(window).is_err() {
                                    return;
                                }
                            }
                        }
                        Event::Input(Ok(item)) => {
                            let now = clock.now();
                            let start_anchor = *anchor.get_or_insert_with(|| {
                                ticker = Some(clock.new_ticker(slide));
                                now
                            });
                            let delta_ns = duration_to_nanos_saturating(now.saturating_duration_since(start_anchor));
                            let size_ns = duration_to_nanos_saturating(size);
                            let slide_ns = duration_to_nanos_saturating(slide);
                            for offset_ns in covering_starts(delta_ns, size_ns, slide_ns) {
                                let start = start_anchor + Duration::from_nanos(offset_ns);
                                windows.entry(start).or_default().push(item.clone());
                            }
                        }
                        Event::Input(Err(_)) => {
                            if let Some(t) = ticker.take() {
                                t.stop();
                            }
                            let now = clock.now();
                            for window in emit_closed(&mut windows, now, true) {
                                let _ = tx.send(window);
                            }
                            break;
                        }
                    }
                }
            })
            .expect("spawn sliding window worker");

        rx
    }

    fn name(&self) -> &str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::stage::channel as stage_channel;

    #[test]
    fn item_belongs_to_multiple_active_windows() {
        let (tx, rx) = stage_channel::<&'static str>();
        let cancel = CancelToken::new();
        let clock = FakeClock::new();
        let stage = Sliding::new(
            "slide",
            Duration::from_secs(1),
            Duration::from_millis(500),
            Arc::new(clock.clone()),
        )
        .unwrap();
        let out = Box::new(stage).process(cancel, rx);

        tx.send(Result::success("a")).unwrap(); // t=0, joins window[0,1s)
        clock.advance(Duration::from_millis(600));
        std::thread::sleep(Duration::from_millis(20));
        tx.send(Result::success("b")).unwrap(); // t=600ms, joins window[0,1s) and window[500ms,1500ms)
        std::thread::sleep(Duration::from_millis(20));

        clock.advance(Duration::from_millis(400)); // t=1000ms: window[0,1s) closes
        std::thread::sleep(Duration::from_millis(20));
        let first = out.recv().unwrap();
        let values: Vec<&str> = first.value().iter().map(|r| *r.value()).collect();
        assert_eq!(values, vec!["a", "b"]);

        clock.advance(Duration::from_millis(500)); // t=1500ms: window[500ms,1500ms) closes
        std::thread::sleep(Duration::from_millis(20));
        let second = out.recv().unwrap();
        let values: Vec<&str> = second.value().iter().map(|r| *r.value()).collect();
        assert_eq!(values, vec!["b"]);

        drop(tx);
    }

    #[test]
    fn remaining_windows_emitted_on_input_completion() {
        let (tx, rx) = stage_channel::<i32>();
        let cancel = CancelToken::new();
        let clock = Arc::new(FakeClock::new());
        let stage = Sliding::new("slide", Duration::from_secs(1), Duration::from_millis(500), clock).unwrap();
        let out = Box::new(stage).process(cancel, rx);
        tx.send(Result::success(1)).unwrap();
        drop(tx);
        let window = out.recv().unwrap();
        assert_eq!(window.value().len(), 1);
        assert!(out.recv().is_err());
    }

    #[test]
    fn slide_greater_than_size_rejected_at_construction() {
        let clock = Arc::new(FakeClock::new());
        let err = Sliding::<i32>::new(
            "slide",
            Duration::from_millis(500),
            Duration::from_secs(1),
            clock,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSlide { .. }));
    }

    #[test]
    fn zero_size_rejected_at_construction() {
        let clock = Arc::new(FakeClock::new());
        let err = Sliding::<i32>::new("slide", Duration::ZERO, Duration::from_millis(1), clock).unwrap_err();
        assert_eq!(err, ConfigError::NonPositiveWindowSize);
    }
}
