//! split (boolean 1→2 routing, C6).
//!
//! **Open question resolved** (per `SPEC_FULL.md` §C.1): failures are
//! duplicated to *both* outputs, symmetric with fan-out's "duplicate to
//! all" semantics — a failure is informative regardless of which leg a
//! consumer is watching.

use crate::cancel::CancelToken;
use crate::result::{Message, Result};
use crate::stage::{channel, StreamReceiver, StreamSender};
use crate::transforms::panic_message;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

/// Snapshot of a [`Split`] stage's observable counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitCounters {
    /// Total items observed (successes and failures).
    pub total: u64,
    /// Successes routed to the `true` output.
    pub true_count: u64,
    /// Successes routed to the `false` output.
    pub false_count: u64,
}

impl SplitCounters {
    /// `true_count / (true_count + false_count)`, or `0.0` if neither side
    /// has received anything yet.
    #[must_use]
    pub fn ratio(&self) -> f64 {
        let total = self.true_count + self.false_count;
        if total == 0 {
            0.0
        } else {
            self.true_count as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    total: AtomicU64,
    true_count: AtomicU64,
    false_count: AtomicU64,
}

/// The two output streams produced by [`Split::process`], plus a live
/// counters handle.
pub struct SplitOutputs<T> {
    /// Items for which the predicate returned `true` (plus every failure).
    pub when_true: StreamReceiver<T>,
    /// Items for which the predicate returned `false` (plus every failure).
    pub when_false: StreamReceiver<T>,
    counters: Arc<Counters>,
}

impl<T> SplitOutputs<T> {
    /// A live snapshot of this stage's observable counters.
    #[must_use]
    pub fn counters(&self) -> SplitCounters {
        SplitCounters {
            total: self.counters.total.load(Ordering::Relaxed),
            true_count: self.counters.true_count.load(Ordering::Relaxed),
            false_count: self.counters.false_count.load(Ordering::Relaxed),
        }
    }
}

/// One predicate, two outputs. Successes are routed by the predicate;
/// failures go to both.
pub struct Split<T, F> {
    name: &'static str,
    predicate: F,
    _marker: std::marker::PhantomData<fn(&T) -> bool>,
}

impl<T, F> Split<T, F>
where
    F: FnMut(&T) -> bool + Send + 'static,
{
    /// Creates a new `split` stage named `name`.
    pub fn new(name: &'static str, predicate: F) -> Self {
        Self {
            name,
            predicate,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T, F> Split<T, F>
where
    T: Clone + Send + 'static,
    F: FnMut(&T) -> bool + Send + 'static,
{
    /// Runs the split, returning both output streams and a counters handle.
    pub fn process(self, cancel_signal: CancelToken, input: StreamReceiver<T>) -> SplitOutputs<T> {
        let Self { name, mut predicate, .. } = self;
        let (true_tx, true_rx): (StreamSender<T>, StreamReceiver<T>) = channel();
        let (false_tx, false_rx): (StreamSender<T>, StreamReceiver<T>) = channel();
        let counters = Arc::new(Counters::default());
        let counters_worker = Arc::clone(&counters);

        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || 'outer: loop {
                let item: Result<T> = crossbeam_channel::select! {
                    recv(cancel_signal.gate()) -> _ => break 'outer,
                    recv(input) -> msg => match msg {
                        Ok(item) => item,
                        Err(_) => break 'outer,
                    },
                };
                counters_worker.total.fetch_add(1, Ordering::Relaxed);
                match item {
                    Result::Success { value, metadata } => {
                        match catch_unwind(AssertUnwindSafe(|| predicate(&value))) {
                            Ok(true) => {
                                counters_worker.true_count.fetch_add(1, Ordering::Relaxed);
                                let routed = Result::Success { value, metadata };
                                if send_or_cancel(&cancel_signal, &true_tx, routed).is_err() {
                                    break 'outer;
                                }
                            }
                            Ok(false) => {
                                counters_worker.false_count.fetch_add(1, Ordering::Relaxed);
                                let routed = Result::Success { value, metadata };
                                if send_or_cancel(&cancel_signal, &false_tx, routed).is_err() {
                                    break 'outer;
                                }
                            }
                            Err(panic) => {
                                let failed = Result::failure(value, Message(panic_message(&panic)), name, 0);
                                if send_or_cancel(&cancel_signal, &true_tx, failed.clone()).is_err() {
                                    break 'outer;
                                }
                                if send_or_cancel(&cancel_signal, &false_tx, failed).is_err() {
                                    break 'outer;
                                }
                            }
                        }
                    }
                    failure @ Result::Failure { .. } => {
                        if send_or_cancel(&cancel_signal, &true_tx, failure.clone()).is_err() {
                            break 'outer;
                        }
                        if send_or_cancel(&cancel_signal, &false_tx, failure).is_err() {
                            break 'outer;
                        }
                    }
                }
            })
            .expect("spawn split worker");

        SplitOutputs {
            when_true: true_rx,
            when_false: false_rx,
            counters,
        }
    }
}

/// Sends `item` on `tx`, observing cancellation while blocked. Returns `Err`
/// if cancellation fired (the caller should stop); a disconnected receiver
/// is not itself fatal to the stage.
fn send_or_cancel<T>(
    cancel: &CancelToken,
    tx: &StreamSender<T>,
    item: Result<T>,
) -> std::result::Result<(), ()> {
    crossbeam_channel::select! {
        recv(cancel.gate()) -> _ => Err(()),
        send(tx, item) -> _ => Ok(()),
    }
}
