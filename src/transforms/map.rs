use super::{panic_message, spawn_stateless, Decision};
use crate::cancel::CancelToken;
use crate::result::{Message, Result};
use crate::stage::{Stage, StreamReceiver};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Applies `f` to every success value, leaving failures structurally intact
/// (re-typed via [`crate::result::Result::map_value`]). `f` never sees
/// failures — a stage that must inspect them should run before `map` or use
/// [`crate::transforms::Tap`]. A panic inside `f` is caught and converted to
/// a failure item (§7's "user-supplied functions that throw/panic MUST be
/// caught at the boundary") rather than tearing down the worker thread.
pub struct Map<T, U, F> {
    name: &'static str,
    f: F,
    _marker: std::marker::PhantomData<fn(T) -> U>,
}

impl<T, U, F> Map<T, U, F>
where
    F: FnMut(T) -> U + Send + 'static,
{
    /// Creates a new `map` stage named `name`, diagnostic-only.
    pub fn new(name: &'static str, f: F) -> Self {
        Self {
            name,
            f,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T, U, F> Stage for Map<T, U, F>
where
    T: Send + 'static,
    U: Default + Send + 'static,
    F: FnMut(T) -> U + Send + 'static,
{
    type In = T;
    type Out = U;

    fn process(
        self: Box<Self>,
        cancel_signal: CancelToken,
        input: StreamReceiver<Self::In>,
    ) -> StreamReceiver<Self::Out> {
        let Self { name, mut f, .. } = *self;
        spawn_stateless(name, cancel_signal, input, move |item| match item {
            Result::Success { value, metadata } => {
                match catch_unwind(AssertUnwindSafe(|| f(value))) {
                    Ok(mapped) => Decision::Emit(Result::Success { value: mapped, metadata }),
                    Err(panic) => {
                        let cause = panic_message(&panic);
                        #[cfg(feature = "tracing-integration")]
                        tracing::warn!(stage = name, %cause, "map function panicked");
                        Decision::Emit(Result::failure(U::default(), Message(cause), name, 0))
                    }
                }
            }
            failure @ Result::Failure { .. } => Decision::Emit(failure.map_value(|_: T| U::default())),
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

    #[test]
    fn maps_success_values() {
        let (tx, rx) = channel::<i32>();
        let cancel = CancelToken::new();
        let out = Box::new(Map::new("double", |v: i32| v * 2)).process(cancel, rx);
        tx.send(Result::success(5)).unwrap();
        drop(tx);
        assert_eq!(*out.recv().unwrap().value(), 10);
        assert!(out.recv().is_err());
    }

    #[test]
    fn passes_failures_through_retyped() {
        let (tx, rx) = channel::<i32>();
        let cancel = CancelToken::new();
        let out = Box::new(Map::new("to_string", |v: i32| v.to_string())).process(cancel, rx);
        tx.send(Result::failure(7, crate::result::Message("boom".into()), "upstream", 1))
            .unwrap();
        drop(tx);
        let got = out.recv().unwrap();
        assert!(got.is_failure());
        assert_eq!(got.error().processor_name.as_ref(), "upstream");
    }

    #[test]
    fn panicking_function_becomes_a_failure_not_a_crash() {
        let (tx, rx) = channel::<i32>();
        let cancel = CancelToken::new();
        let out = Box::new(Map::new("boom", |v: i32| -> i32 {
            if v == 1 {
                panic!("bad input");
            }
            v
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
