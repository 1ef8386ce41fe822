//! Stateless transforms (C4): `map`, `filter`, `tap`, `sample`.
//!
//! Each of these holds no cross-item state, so they share one worker shape:
//! a single thread selecting between the cancel gate and the input channel,
//! applying a per-item function, and forwarding (or dropping) the result.
//! [`spawn_stateless`] factors that shape out so each stage file only
//! supplies its own per-item decision.

mod filter;
mod map;
mod sample;
mod tap;

pub use filter::Filter;
pub use map::Map;
pub use sample::Sample;
pub use tap::Tap;

use crate::cancel::CancelToken;
use crate::result::Result;
use crate::stage::{channel, StreamReceiver, StreamSender};
use std::thread;

/// What to do with one incoming item.
pub(crate) enum Decision<U> {
    /// Forward this item downstream.
    Emit(Result<U>),
    /// Drop this item silently (e.g. `filter` rejecting a success value).
    Drop,
}

/// Extracts a human-readable message from a caught panic payload, per §7's
/// "the exception's message" — shared by every stateless transform that
/// must contain a user-supplied function's panic rather than let it
/// propagate into the stream.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "transform function panicked".to_string()
    }
}

/// Spawns the standard stateless-transform worker: select on `cancel` and
/// `input`, call `decide` per item, forward or drop per its answer, and exit
/// (closing the output channel) on cancellation or input exhaustion.
pub(crate) fn spawn_stateless<T, U, F>(
    thread_name: &'static str,
    cancel: CancelToken,
    input: StreamReceiver<T>,
    mut decide: F,
) -> StreamReceiver<U>
where
    T: Send + 'static,
    U: Send + 'static,
    F: FnMut(Result<T>) -> Decision<U> + Send + 'static,
{
    let (tx, rx): (StreamSender<U>, StreamReceiver<U>) = channel();
    thread::Builder::new()
        .name(thread_name.into())
        .spawn(move || loop {
            crossbeam_channel::select! {
                recv(cancel.gate()) -> _ => break,
                recv(input) -> msg => match msg {
                    Ok(item) => match decide(item) {
                        Decision::Emit(out) => {
                            if tx.send(out).is_err() {
                                break;
                            }
                        }
                        Decision::Drop => {}
                    },
                    Err(_) => break,
                },
            }
        })
        .expect("spawn stateless transform worker");
    rx
}
