//! Parallel map (C5): a fixed-size worker pool applying a function to every
//! success value, with a choice of output order.
//!
//! Three thread roles cooperate, none sharing mutable state by lock: a
//! dispatcher assigns each input success a monotonically increasing sequence
//! number and hands it to whichever worker is free (failures bypass the pool
//! entirely, tagged with their own sequence number so position is preserved);
//! `W` workers apply the user function and forward `(seq, Result<Out>)`
//! pairs onto one shared results channel; a single collector either forwards
//! them as they arrive (`Unordered`) or holds out-of-order arrivals in a
//! pending map until the next expected sequence number is available
//! (`Ordered`). Dispatcher and every worker hold a clone of the same results
//! sender, so the collector's termination condition is the ordinary one:
//! the results channel disconnects once all of them have exited.

use crate::cancel::CancelToken;
use crate::error::{ConfigError, StreamResult};
use crate::result::Result;
use crate::stage::{channel, Stage, StreamReceiver, StreamSender};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

/// Output ordering policy for [`ParallelMap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    /// Emissions follow input order; out-of-order workers buffer until their
    /// turn.
    Ordered,
    /// Emissions follow completion order; no ordering guarantee.
    Unordered,
}

/// A parallel `map` stage with `worker_count` workers and a chosen [`Order`].
pub struct ParallelMap<In, Out, F> {
    name: &'static str,
    worker_count: usize,
    order: Order,
    f: Arc<F>,
    _marker: std::marker::PhantomData<fn(In) -> Out>,
}

impl<In, Out, F> ParallelMap<In, Out, F>
where
    In: Send + 'static,
    Out: Default + Send + 'static,
    F: Fn(&CancelToken, In) -> Result<Out> + Send + Sync + 'static,
{
    /// Creates a new `parallel-map` stage. Rejects `worker_count == 0` at
    /// construction, per the spec's "rejection of invalid configuration MUST
    /// be at construction" rule.
    pub fn new(name: &'static str, worker_count: usize, order: Order, f: F) -> StreamResult<Self> {
        if worker_count == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        Ok(Self {
            name,
            worker_count,
            order,
            f: Arc::new(f),
            _marker: std::marker::PhantomData,
        })
    }
}

struct Tagged<Out> {
    seq: u64,
    result: Result<Out>,
}

#[derive(Debug)]
struct PanicCause(String);

impl std::fmt::Display for PanicCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for PanicCause {}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "parallel-map worker panicked".to_string()
    }
}

fn run_worker<In, Out, F>(
    cancel: CancelToken,
    work_rx: crossbeam_channel::Receiver<(u64, In)>,
    results_tx: crossbeam_channel::Sender<Tagged<Out>>,
    f: Arc<F>,
    name: &'static str,
) where
    In: Send + 'static,
    Out: Default + Send + 'static,
    F: Fn(&CancelToken, In) -> Result<Out> + Send + Sync + 'static,
{
    loop {
        crossbeam_channel::select! {
            recv(cancel.gate()) -> _ => break,
            recv(work_rx) -> msg => match msg {
                Ok((seq, item)) => {
                    let result = catch_unwind(AssertUnwindSafe(|| f(&cancel, item)))
                        .unwrap_or_else(|panic| {
                            let cause = panic_message(&panic);
                            #[cfg(feature = "tracing-integration")]
                            tracing::warn!(stage = name, %cause, "parallel-map worker panicked");
                            Result::failure(Out::default(), PanicCause(cause), name, 0)
                        });
                    if results_tx.send(Tagged { seq, result }).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            },
        }
    }
}

fn run_dispatcher<In, Out>(
    cancel: CancelToken,
    input: StreamReceiver<In>,
    work_tx: crossbeam_channel::Sender<(u64, In)>,
    results_tx: crossbeam_channel::Sender<Tagged<Out>>,
) where
    In: Send + 'static,
    Out: Default + Send + 'static,
{
    let mut seq: u64 = 0;
    loop {
        crossbeam_channel::select! {
            recv(cancel.gate()) -> _ => break,
            recv(input) -> msg => match msg {
                Ok(Result::Success { value, .. }) => {
                    if work_tx.send((seq, value)).is_err() {
                        break;
                    }
                    seq += 1;
                }
                Ok(failure @ Result::Failure { .. }) => {
                    let tagged = Tagged {
                        seq,
                        result: failure.map_value(|_: In| Out::default()),
                    };
                    if results_tx.send(tagged).is_err() {
                        break;
                    }
                    seq += 1;
                }
                Err(_) => break,
            },
        }
    }
}

fn run_collector<Out: Send + 'static>(
    cancel: CancelToken,
    results_rx: crossbeam_channel::Receiver<Tagged<Out>>,
    out_tx: StreamSender<Out>,
    order: Order,
) {
    let mut pending: HashMap<u64, Result<Out>> = HashMap::new();
    let mut next_expected: u64 = 0;
    loop {
        crossbeam_channel::select! {
            recv(cancel.gate()) -> _ => break,
            recv(results_rx) -> msg => match msg {
                Ok(Tagged { seq, result }) => match order {
                    Order::Unordered => {
                        if out_tx.send(result).is_err() {
                            break;
                        }
                    }
                    Order::Ordered => {
                        pending.insert(seq, result);
                        while let Some(next) = pending.remove(&next_expected) {
                            if out_tx.send(next).is_err() {
                                return;
                            }
                            next_expected += 1;
                        }
                    }
                },
                Err(_) => break,
            },
        }
    }
}

impl<In, Out, F> Stage for ParallelMap<In, Out, F>
where
    In: Send + 'static,
    Out: Default + Send + 'static,
    F: Fn(&CancelToken, In) -> Result<Out> + Send + Sync + 'static,
{
    type In = In;
    type Out = Out;

    fn process(
        self: Box<Self>,
        cancel_signal: CancelToken,
        input: StreamReceiver<Self::In>,
    ) -> StreamReceiver<Self::Out> {
        let Self {
            name,
            worker_count,
            order,
            f,
            ..
        } = *self;

        let (work_tx, work_rx) = crossbeam_channel::bounded::<(u64, In)>(worker_count);
        let (results_tx, results_rx) = crossbeam_channel::unbounded::<Tagged<Out>>();
        let (out_tx, out_rx): (StreamSender<Out>, StreamReceiver<Out>) = channel();

        #[cfg(feature = "tracing-integration")]
        tracing::debug!(stage = name, worker_count, ?order, "parallel-map stage constructed");

        for i in 0..worker_count {
            let cancel = cancel_signal.clone();
            let work_rx = work_rx.clone();
            let results_tx = results_tx.clone();
            let f = Arc::clone(&f);
            thread::Builder::new()
                .name(format!("{name}-worker-{i}"))
                .spawn(move || {
                    #[cfg(feature = "tracing-integration")]
                    tracing::trace!(stage = name, worker = i, "parallel-map worker spawned");
                    run_worker(cancel, work_rx, results_tx, f, name);
                    #[cfg(feature = "tracing-integration")]
                    tracing::trace!(stage = name, worker = i, "parallel-map worker joined");
                })
                .expect("spawn parallel-map worker");
        }
        drop(work_rx);

        {
            let cancel = cancel_signal.clone();
            let results_tx = results_tx.clone();
            thread::Builder::new()
                .name(format!("{name}-dispatch"))
                .spawn(move || run_dispatcher(cancel, input, work_tx, results_tx))
                .expect("spawn parallel-map dispatcher");
        }
        drop(results_tx);

        thread::Builder::new()
            .name(format!("{name}-collect"))
            .spawn(move || run_collector(cancel_signal, results_rx, out_tx, order))
            .expect("spawn parallel-map collector");

        out_rx
    }

    fn name(&self) -> &str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::Message;
    use crate::stage::channel as stage_channel;
    use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
    use std::time::Duration;

    #[test]
    fn ordered_preserves_input_order_under_uneven_latency() {
        let (tx, rx) = stage_channel::<u64>();
        let cancel = CancelToken::new();
        let stage = ParallelMap::new("pm", 4, Order::Ordered, |_c: &CancelToken, v: u64| {
            std::thread::sleep(Duration::from_millis((5 - v.min(4)) * 2));
            Result::success(v)
        })
        .unwrap();
        let out = Box::new(stage).process(cancel, rx);
        for v in 0..5u64 {
            tx.send(Result::success(v)).unwrap();
        }
        drop(tx);
        let mut got = Vec::new();
        while let Ok(item) = out.recv() {
            got.push(*item.value());
        }
        assert_eq!(got, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn unordered_emits_all_items_eventually() {
        let (tx, rx) = stage_channel::<u64>();
        let cancel = CancelToken::new();
        let stage = ParallelMap::new("pm", 3, Order::Unordered, |_c: &CancelToken, v: u64| {
            Result::success(v * 2)
        })
        .unwrap();
        let out = Box::new(stage).process(cancel, rx);
        for v in 0..10u64 {
            tx.send(Result::success(v)).unwrap();
        }
        drop(tx);
        let mut got = Vec::new();
        while let Ok(item) = out.recv() {
            got.push(*item.value());
        }
        got.sort_unstable();
        assert_eq!(got, (0..10).map(|v| v * 2).collect::<Vec<_>>());
    }

    #[test]
    fn zero_workers_rejected_at_construction() {
        let err = ParallelMap::new("pm", 0, Order::Unordered, |_c: &CancelToken, v: u64| {
            Result::success(v)
        })
        .unwrap_err();
        assert_eq!(err, ConfigError::ZeroWorkers);
    }

    #[test]
    fn panicking_worker_becomes_a_failure_item() {
        let (tx, rx) = stage_channel::<u64>();
        let cancel = CancelToken::new();
        let calls = Arc::new(AtomicU64::new(0));
        let calls2 = Arc::clone(&calls);
        let stage = ParallelMap::new("pm", 1, Order::Ordered, move |_c: &CancelToken, v: u64| {
            calls2.fetch_add(1, AtomicOrdering::SeqCst);
            if v == 1 {
                panic!("boom");
            }
            Result::success(v)
        })
        .unwrap();
        let out = Box::new(stage).process(cancel, rx);
        tx.send(Result::success(0)).unwrap();
        tx.send(Result::success(1)).unwrap();
        tx.send(Result::success(2)).unwrap();
        drop(tx);
        assert_eq!(*out.recv().unwrap().value(), 0);
        let failed = out.recv().unwrap();
        assert!(failed.is_failure());
        assert_eq!(failed.error().processor_name.as_ref(), "pm");
        assert_eq!(*out.recv().unwrap().value(), 2);
    }

    #[test]
    fn failures_bypass_worker_pool_but_keep_position() {
        let (tx, rx) = stage_channel::<u64>();
        let cancel = CancelToken::new();
        let stage = ParallelMap::new("pm", 2, Order::Ordered, |_c: &CancelToken, v: u64| {
            Result::success(v)
        })
        .unwrap();
        let out = Box::new(stage).process(cancel, rx);
        tx.send(Result::success(0)).unwrap();
        tx.send(Result::failure(1, Message("bad".into()), "upstream", 0))
            .unwrap();
        tx.send(Result::success(2)).unwrap();
        drop(tx);
        assert!(out.recv().unwrap().is_success());
        assert!(out.recv().unwrap().is_failure());
        assert!(out.recv().unwrap().is_success());
    }

    #[test]
    fn cancellation_stops_emissions_promptly() {
        let (tx, rx) = stage_channel::<u64>();
        let cancel = CancelToken::new();
        let stage = ParallelMap::new("pm", 2, Order::Unordered, |_c: &CancelToken, v: u64| {
            std::thread::sleep(Duration::from_millis(50));
            Result::success(v)
        })
        .unwrap();
        let out = Box::new(stage).process(cancel.clone(), rx);
        for v in 0..20u64 {
            let _ = tx.send(Result::success(v));
        }
        cancel.cancel(crate::cancel::CancelReason::user("stop"));
        drop(tx);
        // Output completes; we don't assert on count, only that it closes.
        while out.recv().is_ok() {}
    }
}
