//! Size-or-latency batching (C8).

use crate::cancel::CancelToken;
use crate::clock::{Clock, Timer};
use crate::error::{ConfigError, StreamResult};
use crate::result::Result;
use crate::stage::{channel, Stage, StreamReceiver, StreamSender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Groups successful items into batches triggered by either reaching
/// `max_size` items or `max_latency` elapsing since the first item in the
/// current batch. Failures are emitted immediately as empty-sequence
/// failure batches, preserving the original cause and processor name, and
/// do not flush whatever batch is accumulating.
pub struct Batch<T> {
    name: &'static str,
    max_size: usize,
    max_latency: Duration,
    clock: Arc<dyn Clock>,
    _marker: std::marker::PhantomData<T>,
}

impl<T> Batch<T> {
    /// Creates a new `batch` stage. Rejects `max_size == 0` or a zero
    /// `max_latency` at construction.
    pub fn new(
        name: &'static str,
        max_size: usize,
        max_latency: Duration,
        clock: Arc<dyn Clock>,
    ) -> StreamResult<Self> {
        if max_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if max_latency.is_zero() {
            return Err(ConfigError::NonPositiveBatchLatency);
        }
        Ok(Self {
            name,
            max_size,
            max_latency,
            clock,
            _marker: std::marker::PhantomData,
        })
    }
}

impl<T> Stage for Batch<T>
where
    T: Send + 'static,
{
    type In = T;
    type Out = Vec<T>;

    fn process(
        self: Box<Self>,
        cancel_signal: CancelToken,
        input: StreamReceiver<Self::In>,
    ) -> StreamReceiver<Self::Out> {
        let Self {
            name,
            max_size,
            max_latency,
            clock,
            ..
        } = *self;
        let (tx, rx): (StreamSender<Vec<T>>, StreamReceiver<Vec<T>>) = channel();

        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut batch: Vec<T> = Vec::new();
                let mut timer: Option<Timer> = None;

                loop {
                    let fired = match &timer {
                        Some(t) => crossbeam_channel::select! {
                            recv(cancel_signal.gate()) -> _ => Event::Cancelled,
                            recv(input) -> msg => Event::Input(msg),
                            recv(t.receiver()) -> _ => Event::TimerFired,
                        },
                        None => crossbeam_channel::select! {
                            recv(cancel_signal.gate()) -> _ => Event::Cancelled,
                            recv(input) -> msg => Event::Input(msg),
                        },
                    };

                    match fired {
                        Event::Cancelled => {
                            if let Some(t) = timer.take() {
                                t.stop();
                            }
                            break;
                        }
                        Event::TimerFired => {
                            timer = None;
                            let flushed = std::mem::take(&mut batch);
                            if tx.send(Result::success(flushed)).is_err() {
                                break;
                            }
                        }
                        Event::Input(Ok(Result::Success { value, .. })) => {
                            if batch.is_empty() {
                                timer = Some(clock.new_timer(max_latency));
                            }
                            batch.push(value);
                            if batch.len() >= max_size {
                                if let Some(t) = timer.take() {
                                    t.stop();
                                }
                                let flushed = std::mem::take(&mut batch);
                                if tx.send(Result::success(flushed)).is_err() {
                                    break;
                                }
                            }
                        }
                        Event::Input(Ok(Result::Failure { error, .. })) => {
                            let empty_failure = Result::from_error(error.with_item(Vec::new()));
                            if tx.send(empty_failure).is_err() {
                                break;
                            }
                        }
                        Event::Input(Err(_)) => {
                            if let Some(t) = timer.take() {
                                t.stop();
                            }
                            if !batch.is_empty() {
                                let flushed = std::mem::take(&mut batch);
                                let _ = tx.send(Result::success(flushed));
                            }
                            break;
                        }
                    }
                }
            })
            .expect("spawn batch worker");

        rx
    }

    fn name(&self) -> &str {
        self.name
    }
}

enum Event<T> {
    Cancelled,
    TimerFired,
    Input(core::result::Result<Result<T>, crossbeam_channel::RecvError>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::result::Message;
    use crate::stage::channel as stage_channel;

    #[test]
    fn flushes_on_reaching_max_size() {
        let (tx, rx) = stage_channel::<i32>();
        let cancel = CancelToken::new();
        let clock = Arc::new(FakeClock::new());
        let stage = Batch::new("batch", 2, Duration::from_secs(10), clock).unwrap();
        let out = Box::new(stage).process(cancel, rx);

        tx.send(Result::success(1)).unwrap();
        tx.send(Result::success(2)).unwrap();
        let batch = out.recv().unwrap();
        assert_eq!(*batch.value(), vec![1, 2]);
        drop(tx);
        assert!(out.recv().is_err());
    }

    #[test]
    fn flushes_partial_batch_on_timer_fire() {
        let (tx, rx) = stage_channel::<i32>();
        let cancel = CancelToken::new();
        let clock = FakeClock::new();
        let stage = Batch::new("batch", 10, Duration::from_millis(100), Arc::new(clock.clone()))
            .unwrap();
        let out = Box::new(stage).process(cancel, rx);

        tx.send(Result::success(1)).unwrap();
        tx.send(Result::success(2)).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        clock.advance(Duration::from_millis(100));
        let batch = out.recv().unwrap();
        assert_eq!(*batch.value(), vec![1, 2]);
        drop(tx);
        assert!(out.recv().is_err());
    }

    #[test]
    fn failures_emit_immediately_without_flushing() {
        let (tx, rx) = stage_channel::<i32>();
        let cancel = CancelToken::new();
        let clock = Arc::new(FakeClock::new());
        let stage = Batch::new("batch", 10, Duration::from_secs(10), clock).unwrap();
        let out = Box::new(stage).process(cancel, rx);

        tx.send(Result::success(1)).unwrap();
        tx.send(Result::failure(2, Message("e".into()), "s", 0))
            .unwrap();
        let failure = out.recv().unwrap();
        assert!(failure.is_failure());
        assert!(failure.error().item.is_empty());

        drop(tx);
        let flushed = out.recv().unwrap();
        assert_eq!(*flushed.value(), vec![1]);
        assert!(out.recv().is_err());
    }

    #[test]
    fn partial_batch_flushed_on_input_completion() {
        let (tx, rx) = stage_channel::<i32>();
        let cancel = CancelToken::new();
        let clock = Arc::new(FakeClock::new());
        let stage = Batch::new("batch", 10, Duration::from_secs(10), clock).unwrap();
        let out = Box::new(stage).process(cancel, rx);

        tx.send(Result::success(1)).unwrap();
        drop(tx);
        let batch = out.recv().unwrap();
        assert_eq!(*batch.value(), vec![1]);
        assert!(out.recv().is_err());
    }

    #[test]
    fn zero_max_size_rejected_at_construction() {
        let clock = Arc::new(FakeClock::new());
        let err = Batch::<i32>::new("batch", 0, Duration::from_secs(1), clock).unwrap_err();
        assert_eq!(err, ConfigError::ZeroBatchSize);
    }

    #[test]
    fn zero_max_latency_rejected_at_construction() {
        let clock = Arc::new(FakeClock::new());
        let err = Batch::<i32>::new("batch", 1, Duration::ZERO, clock).unwrap_err();
        assert_eq!(err, ConfigError::NonPositiveBatchLatency);
    }
}
