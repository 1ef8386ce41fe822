use super::{panic_message, spawn_stateless, Decision};
use crate::cancel::CancelToken;
use crate::result::{Message, Result};
use crate::stage::{Stage, StreamReceiver};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Keeps success values for which `predicate` returns `true`, drops the
/// rest. Failures always pass through unfiltered — dropping a failure would
/// silently discard an error the stage contract requires to stay observable.
/// A panicking predicate is caught and converted to a failure item (§7)
/// rather than propagating into the stream.
pub struct Filter<T, F> {
    name: &'static str,
    predicate: F,
    _marker: std::marker::PhantomData<fn(&T) -> bool>,
}

impl<T, F> Filter<T, F>
where
    F: FnMut(&T) -> bool + Send + 'static,
{
    /// Creates a new `filter` stage named `name`.
    pub fn new(name: &'static str, predicate: F) -> Self {
        Self {
            name,
            predicate,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T, F> Stage for Filter<T, F>
where
    T: Send + 'static,
    F: FnMut(&T) -> bool + Send + 'static,
{
    type In = T;
    type Out = T;

    fn process(
        self: Box<Self>,
        cancel_signal: CancelToken,
        input: StreamReceiver<Self::In>,
    ) -> StreamReceiver<Self::Out> {
        let Self { name, mut predicate, .. } = *self;
        spawn_stateless(name, cancel_signal, input, move |item| match item {
            Result::Success { value, metadata } => {
                match catch_unwind(AssertUnwindSafe(|| predicate(&value))) {
                    Ok(true) => Decision::Emit(Result::Success { value, metadata }),
                    Ok(false) => Decision::Drop,
                    Err(panic) => {
                        let cause = panic_message(&panic);
                        #[cfg(feature = "tracing-integration")]
                        tracing::warn!(stage = name, %cause, "filter predicate panicked");
                        Decision::Emit(Result::failure(value, Message(cause), name, 0))
                    }
                }
            }
            failure @ Result::Failure { .. } => Decision::Emit(failure),
        })
    }

    fn name(&self) -> &str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::channel;

    #[test]
    fn drops_values_failing_predicate() {
        let (tx, rx) = channel::<i32>();
        let cancel = CancelToken::new();
        let out = Box::new(Filter::new("evens", |v: &i32| v % 2 == 0)).process(cancel, rx);
        for v in [1, 2, 3, 4] {
            tx.send(Result::success(v)).unwrap();
        }
        drop(tx);
        assert_eq!(*out.recv().unwrap().value(), 2);
        assert_eq!(*out.recv().unwrap().value(), 4);
        assert!(out.recv().is_err());
    }

    #[test]
    fn always_passes_failures() {
        let (tx, rx) = channel::<i32>();
        let cancel = CancelToken::new();
        let out = Box::new(Filter::new("evens", |v: &i32| v % 2 == 0)).process(cancel, rx);
        tx.send(Result::failure(3, crate::result::Message("x".into()), "s", 0))
            .unwrap();
        drop(tx);
        assert!(out.recv().unwrap().is_failure());
    }

    #[test]
    fn panicking_predicate_becomes_a_failure_not_a_crash() {
        let (tx, rx) = channel::<i32>();
        let cancel = CancelToken::new();
        let out = Box::new(Filter::new("boom", |v: &i32| {
            if *v == 1 {
                panic!("bad input");
            }
            true
        }))
        .process(cancel, rx);
        tx.send(Result::success(1)).unwrap();
        tx.send(Result::success(2)).unwrap();
        drop(tx);
        let failed = out.recv().unwrap();
        assert!(failed.is_failure());
        assert_eq!(failed.error().processor_name.as_ref(), "boom");
        assert_eq!(*out.recv().unwrap().value(), 2);
    }
}
