//! tumbling window (C9): contiguous, non-overlapping intervals of length
//! `size`, anchored to the first item observed (§9.OQ2's recommendation,
//! pinned by `SPEC_FULL.md` §C.2).

use super::window_metadata;
use crate::cancel::CancelToken;
use crate::clock::{Clock, Ticker, Timestamp};
use crate::error::{ConfigError, StreamResult};
use crate::result::Result;
use crate::stage::{channel, Stage, StreamReceiver, StreamSender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Divides arrival time into contiguous intervals of length `size`, the
/// first starting at the first item's arrival timestamp. Each item —
/// success or failure — belongs to exactly one window, based on
/// `clock.now()` at arrival. A periodic ticker at interval `size` emits
/// each completed window; the final, possibly partial, window is emitted on
/// input completion.
pub struct Tumbling<T> {
    name: &'static str,
    size: Duration,
    clock: Arc<dyn Clock>,
    _marker: std::marker::PhantomData<T>,
}

impl<T> Tumbling<T> {
    /// Creates a new `tumbling` window stage. Rejects a zero `size` at
    /// construction.
    pub fn new(name: &'static str, size: Duration, clock: Arc<dyn Clock>) -> StreamResult<Self> {
        if size.is_zero() {
            return Err(ConfigError::NonPositiveWindowSize);
        }
        Ok(Self {
            name,
            size,
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

impl<T> Stage for Tumbling<T>
where
    T: Send + 'static,
{
    type In = T;
    type Out = Vec<Result<T>>;

    fn process(
        self: Box<Self>,
        cancel_signal: CancelToken,
        input: StreamReceiver<Self::In>,
    ) -> StreamReceiver<Self::Out> {
        let Self { name, size, clock, .. } = *self;
        let (tx, rx): (StreamSender<Vec<Result<T>>>, StreamReceiver<Vec<Result<T>>>) = channel();

        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut window_start: Option<Timestamp> = None;
                let mut items: Vec<Result<T>> = Vec::new();
                let mut ticker: Option<Ticker> = None;

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
                            let start = window_start.expect("ticker only exists once a window is open");
                            let end = start + size;
                            window_start = Some(end);
                            let flushed = std::mem::take(&mut items);
                            let out = Result::Success {
                                value: flushed,
                                metadata: window_metadata(start, end, size, "tumbling"),
                            };
                            if tx.send(out).is_err() {
                                break;
                            }
                        }
                        Event::Input(Ok(item)) => {
                            if window_start.is_none() {
                                window_start = Some(clock.now());
                                ticker = Some(clock.new_ticker(size));
                            }
                            items.push(item);
                        }
                        Event::Input(Err(_)) => {
                            if let Some(t) = ticker.take() {
                                t.stop();
                            }
                            if let Some(start) = window_start {
                                if !items.is_empty() {
                                    let end = start + size;
                                    let out = Result::Success {
                                        value: items,
                                        metadata: window_metadata(start, end, size, "tumbling"),
                                    };
                                    let _ = tx.send(out);
                                }
                            }
                            break;
                        }
                    }
                }
            })
            .expect("spawn tumbling window worker");

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
    use crate::metadata::{keys, Value};
    use crate::stage::channel as stage_channel;

    #[test]
    fn splits_arrivals_into_contiguous_windows_from_spec_scenario() {
        let (tx, rx) = stage_channel::<&'static str>();
        let cancel = CancelToken::new();
        let clock = FakeClock::new();
        let stage = Tumbling::new("tumble", Duration::from_secs(1), Arc::new(clock.clone())).unwrap();
        let out = Box::new(stage).process(cancel, rx);

        tx.send(Result::success("a")).unwrap(); // t=0
        clock.advance(Duration::from_millis(500));
        tx.send(Result::success("b")).unwrap(); // t=500ms
        std::thread::sleep(Duration::from_millis(20));
        clock.advance(Duration::from_millis(700)); // t=1200ms, tick at 1000ms fires
        std::thread::sleep(Duration::from_millis(20));

        let first = out.recv().unwrap();
        let values: Vec<&str> = first.value().iter().map(|r| *r.value()).collect();
        assert_eq!(values, vec!["a", "b"]);
        assert_eq!(first.get_metadata(keys::WINDOW_START), Some(&Value::Timestamp(0)));
        assert_eq!(
            first.get_metadata(keys::WINDOW_END),
            Some(&Value::Timestamp(Duration::from_secs(1).as_nanos() as u64))
        );
        assert_eq!(first.get_metadata(keys::WINDOW_TYPE), Some(&Value::from("tumbling")));

        tx.send(Result::success("c")).unwrap(); // t=1200ms, second window
        std::thread::sleep(Duration::from_millis(20));
        clock.advance(Duration::from_millis(1000)); // t=2200ms, tick at 2000ms fires
        std::thread::sleep(Duration::from_millis(20));
        let second = out.recv().unwrap();
        let values: Vec<&str> = second.value().iter().map(|r| *r.value()).collect();
        assert_eq!(values, vec!["c"]);

        drop(tx);
    }

    #[test]
    fn emits_partial_window_on_input_completion() {
        let (tx, rx) = stage_channel::<i32>();
        let cancel = CancelToken::new();
        let clock = Arc::new(FakeClock::new());
        let stage = Tumbling::new("tumble", Duration::from_secs(10), clock).unwrap();
        let out = Box::new(stage).process(cancel, rx);
        tx.send(Result::success(1)).unwrap();
        drop(tx);
        let window = out.recv().unwrap();
        assert_eq!(window.value().len(), 1);
        assert!(out.recv().is_err());
    }

    #[test]
    fn zero_size_rejected_at_construction() {
        let clock = Arc::new(FakeClock::new());
        let err = Tumbling::<i32>::new("tumble", Duration::ZERO, clock).unwrap_err();
        assert_eq!(err, ConfigError::NonPositiveWindowSize);
    }
}
