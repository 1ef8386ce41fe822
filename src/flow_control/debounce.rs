//! debounce (trailing edge, C7) — the hard part of this component, per the
//! spec's own "critical implementation discipline" callout.
//!
//! Exactly one worker owns the timer and the pending slot. Its main loop is
//! a single dynamic [`crossbeam_channel::Select`] over: input arrival,
//! timer fire, cancellation — never a shared-state mutex over the timer
//! handle, and never an emission performed while holding exclusive state
//! that the emitting path would need to re-acquire (the anti-pattern the
//! spec calls out as a deadlock risk under a fake clock's
//! `block_until_ready`).

use crate::cancel::CancelToken;
use crate::clock::Clock;
use crate::error::{ConfigError, StreamResult};
use crate::metadata::Metadata;
use crate::result::Result;
use crate::stage::{channel, Stage, StreamReceiver, StreamSender};
use crossbeam_channel::Select;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Emits the most recent success seen within each quiescent interval of
/// length `duration`. Failures always pass through immediately, bypassing
/// the timer; the debounce state is unaffected by them.
pub struct Debounce<T> {
    name: &'static str,
    duration: Duration,
    clock: Arc<dyn Clock>,
    _marker: std::marker::PhantomData<T>,
}

impl<T> Debounce<T> {
    /// Creates a new `debounce` stage. Rejects a zero `duration` at
    /// construction.
    pub fn new(name: &'static str, duration: Duration, clock: Arc<dyn Clock>) -> StreamResult<Self> {
        if duration.is_zero() {
            return Err(ConfigError::NonPositiveDebounceDuration);
        }
        Ok(Self {
            name,
            duration,
            clock,
            _marker: std::marker::PhantomData,
        })
    }
}

impl<T> Stage for Debounce<T>
where
    T: Send + 'static,
{
    type In = T;
    type Out = T;

    fn process(
        self: Box<Self>,
        cancel_signal: CancelToken,
        input: StreamReceiver<Self::In>,
    ) -> StreamReceiver<Self::Out> {
        let Self { name, duration, clock, .. } = *self;
        let (tx, rx): (StreamSender<T>, StreamReceiver<T>) = channel();

        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut timer = None;
                let mut pending: Option<(T, Metadata)> = None;

                loop {
                    let mut sel = Select::new();
                    let cancel_idx = sel.recv(cancel_signal.gate());
                    let input_idx = sel.recv(&input);
                    let timer_idx = timer.as_ref().map(|t: &crate::clock::Timer| sel.recv(t.receiver()));

                    let oper = sel.select();
                    let idx = oper.index();

                    if idx == cancel_idx {
                        let _ = oper.recv(cancel_signal.gate());
                        #[cfg(feature = "tracing-integration")]
                        tracing::debug!(stage = name, reason = ?cancel_signal.reason(), "debounce observed cancellation");
                        if let Some(t) = timer.take() {
                            t.stop();
                        }
                        break;
                    } else if idx == input_idx {
                        match oper.recv(&input) {
                            Ok(Result::Success { value, metadata }) => {
                                match &timer {
                                    Some(t) => t.reset(duration),
                                    None => timer = Some(clock.new_timer(duration)),
                                }
                                pending = Some((value, metadata));
                            }
                            Ok(failure @ Result::Failure { .. }) => {
                                if tx.send(failure).is_err() {
                                    break;
                                }
                            }
                            Err(_) => {
                                if let Some(t) = timer.take() {
                                    t.stop();
                                }
                                if let Some((value, metadata)) = pending.take() {
                                    let _ = tx.send(Result::Success { value, metadata });
                                }
                                break;
                            }
                        }
                    } else if Some(idx) == timer_idx {
                        let t = timer.take().expect("timer_idx implies timer is Some");
                        let _ = oper.recv(t.receiver());
                        if let Some((value, metadata)) = pending.take() {
                            if tx.send(Result::Success { value, metadata }).is_err() {
                                break;
                            }
                        }
                    }
                }
            })
            .expect("spawn debounce worker");

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
    use crate::result::Message;
    use crate::stage::channel as stage_channel;
    use std::time::Duration;

    fn send_and_settle<T>(tx: &StreamSender<T>, item: Result<T>) {
        tx.send(item).unwrap();
        std::thread::sleep(Duration::from_millis(20));
    }

    #[test]
    fn trailing_edge_plus_error_bypass_scenario_from_spec() {
        let (tx, rx) = stage_channel::<i32>();
        let cancel = CancelToken::new();
        let clock = FakeClock::new();
        let stage = Debounce::new("debounce", Duration::from_millis(100), Arc::new(clock.clone()))
            .unwrap();
        let out = Box::new(stage).process(cancel, rx);

        send_and_settle(&tx, Result::success(1)); // t=0
        clock.advance(Duration::from_millis(50));
        send_and_settle(&tx, Result::success(2)); // t=50
        clock.advance(Duration::from_millis(10));
        send_and_settle(&tx, Result::failure(3, Message("e".into()), "s", 0)); // t=60
        assert!(out.recv().unwrap().is_failure());
        clock.advance(Duration::from_millis(10));
        send_and_settle(&tx, Result::success(4)); // t=70
        clock.advance(Duration::from_millis(100)); // fires at t=170
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(*out.recv().unwrap().value(), 4);
        drop(tx);
        assert!(out.recv().is_err());
    }

    #[test]
    fn pending_item_flushed_on_input_completion() {
        let (tx, rx) = stage_channel::<i32>();
        let cancel = CancelToken::new();
        let clock = FakeClock::new();
        let stage = Debounce::new("debounce", Duration::from_secs(10), Arc::new(clock))
            .unwrap();
        let out = Box::new(stage).process(cancel, rx);
        send_and_settle(&tx, Result::success(1));
        drop(tx);
        assert_eq!(*out.recv().unwrap().value(), 1);
        assert!(out.recv().is_err());
    }

    #[test]
    fn zero_duration_rejected_at_construction() {
        let clock = Arc::new(FakeClock::new());
        let err = Debounce::<i32>::new("debounce", Duration::ZERO, clock).unwrap_err();
        assert_eq!(err, ConfigError::NonPositiveDebounceDuration);
    }
}
