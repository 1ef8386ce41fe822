//! The stage contract (C3): the one thing every transform, router, and
//! windowing operator in this crate implements.
//!
//! A [`Stage`] turns one input stream into one output stream. `process` is
//! single-shot — a stage instance is consumed by the call, matching the
//! "one `process()` call per instance" contract — and must observe
//! `cancel_signal` promptly at every suspension point, and flush whatever
//! state it holds (partial batches, open windows, buffered items) before its
//! output stream closes.

use crate::cancel::CancelToken;
use crate::result::Result;
use crossbeam_channel::{Receiver, Sender};

/// The channel-backed sequence of `Result<T>` items every stage consumes and
/// produces. Bounded at capacity 1 so a slow consumer naturally back-pressures
/// its producer.
pub type StreamReceiver<T> = Receiver<Result<T>>;
/// The sending half of a [`StreamReceiver`].
pub type StreamSender<T> = Sender<Result<T>>;

/// Capacity used for every stage-to-stage channel in this crate. Chosen to be
/// the smallest value that still provides genuine back-pressure (zero would
/// make every send synchronous with the receiver, which is stricter than the
/// "natural back-pressure" the stage contract asks for; one lets a producer
/// stay one item ahead of a consumer without unbounded queuing).
pub const CHANNEL_CAPACITY: usize = 1;

/// Creates a new stage-to-stage channel pair at the crate's standard capacity.
#[must_use]
pub fn channel<T>() -> (StreamSender<T>, StreamReceiver<T>) {
    crossbeam_channel::bounded(CHANNEL_CAPACITY)
}

/// A single stream-processing operation: input stream in, output stream out.
///
/// Implementations run their work on a dedicated worker thread (or a small
/// pool, for concurrent stages) spawned from within `process`, and must
/// return the output receiver without blocking the caller. The worker(s) must
/// exit — closing the output channel — once the input stream is exhausted
/// *or* `cancel_signal` fires, whichever happens first.
pub trait Stage: Send {
    /// The element type of values flowing in.
    type In: Send + 'static;
    /// The element type of values flowing out.
    type Out: Send + 'static;

    /// Consumes this stage, wiring `input` to a freshly spawned worker and
    /// returning the receiver for its output. Must be called at most once.
    fn process(
        self: Box<Self>,
        cancel_signal: CancelToken,
        input: StreamReceiver<Self::In>,
    ) -> StreamReceiver<Self::Out>;

    /// A stable, human-readable identifier for diagnostics and for
    /// [`crate::result::StreamError::processor_name`].
    fn name(&self) -> &str;
}

/// Chaining sugar over [`Stage`]: `a.pipe(b)` wires `a`'s output directly
/// into `b`'s input, producing a single combined stage.
pub trait StageExt: Stage + Sized {
    /// Combines this stage with `next`, feeding this stage's output directly
    /// into `next`'s input.
    fn pipe<N>(self, next: N) -> Piped<Self, N>
    where
        N: Stage<In = Self::Out>,
    {
        Piped { first: self, second: next }
    }
}

impl<S: Stage> StageExt for S {}

/// Two stages fused into one by [`StageExt::pipe`].
pub struct Piped<A, B> {
    first: A,
    second: B,
}

impl<A, B> Stage for Piped<A, B>
where
    A: Stage,
    B: Stage<In = A::Out>,
{
    type In = A::In;
    type Out = B::Out;

    fn process(
        self: Box<Self>,
        cancel_signal: CancelToken,
        input: StreamReceiver<Self::In>,
    ) -> StreamReceiver<Self::Out> {
        let Self { first, second } = *self;
        let mid = Box::new(first).process(cancel_signal.clone(), input);
        Box::new(second).process(cancel_signal, mid)
    }

    fn name(&self) -> &str {
        "piped"
    }
}
