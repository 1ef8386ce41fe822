use super::{panic_message, spawn_stateless, Decision};
use crate::cancel::CancelToken;
use crate::stage::{Stage, StreamReceiver};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Runs a side-effecting observer over every item — success or failure — and
/// forwards it unchanged. Used for metrics, logging, and diagnostics; must
/// never mutate the item. A panic in the observer is contained and turned
/// into a log-level event (§4.4) rather than propagating into the stream or
/// affecting the forwarded item.
pub struct Tap<T, F> {
    name: &'static str,
    observe: F,
    _marker: std::marker::PhantomData<fn(&crate::result::Result<T>)>,
}

impl<T, F> Tap<T, F>
where
    F: FnMut(&crate::result::Result<T>) + Send + 'static,
{
    /// Creates a new `tap` stage named `name`.
    pub fn new(name: &'static str, observe: F) -> Self {
        Self {
            name,
            observe,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T, F> Stage for Tap<T, F>
where
    T: Send + 'static,
    F: FnMut(&crate::result::Result<T>) + Send + 'static,
{
    type In = T;
    type Out = T;

    fn process(
        self: Box<Self>,
        cancel_signal: CancelToken,
        input: StreamReceiver<Self::In>,
    ) -> StreamReceiver<Self::Out> {
        let Self { name, mut observe, .. } = *self;
        spawn_stateless(name, cancel_signal, input, move |item| {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| observe(&item))) {
                #[cfg(feature = "tracing-integration")]
                tracing::warn!(stage = name, cause = %panic_message(&panic), "tap effect panicked");
                #[cfg(not(feature = "tracing-integration"))]
                let _ = panic_message(&panic);
            }
            Decision::Emit(item)
        })
    }

    fn name(&self) -> &str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::Result;
    use crate::stage::channel;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn observes_every_item_without_altering_it() {
        let (tx, rx) = channel::<i32>();
        let cancel = CancelToken::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = Arc::clone(&seen);
        let out = Box::new(Tap::new("count", move |_item: &Result<i32>| {
            seen2.fetch_add(1, Ordering::SeqCst);
        }))
        .process(cancel, rx);
        tx.send(Result::success(9)).unwrap();
        drop(tx);
        assert_eq!(*out.recv().unwrap().value(), 9);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_effect_is_contained_item_still_forwarded() {
        let (tx, rx) = channel::<i32>();
        let cancel = CancelToken::new();
        let out = Box::new(Tap::new("boom", |_item: &Result<i32>| {
            panic!("observer exploded");
        }))
        .process(cancel, rx);
        tx.send(Result::success(9)).unwrap();
        drop(tx);
        assert_eq!(*out.recv().unwrap().value(), 9);
        assert!(out.recv().is_err());
    }
}
