//! The Result-wrapped stream model (C1).
//!
//! Every stage consumes and produces a lazy sequence of [`Result<T>`] items:
//! each item is either a [`Success`](Result::Success) value or a
//! [`Failure`](Result::Failure) carrying a [`StreamError`]. Errors travel
//! in-band, so a stage makes a single contract decision per item — propagate,
//! transform, filter, or absorb — instead of juggling a parallel error
//! channel.

use crate::metadata::{Metadata, Value};
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// An opaque, boxed cause, convertible to a human-readable message via
/// `Display`/`Error`.
pub type Cause = Arc<dyn StdError + Send + Sync + 'static>;

/// A structured record of a per-item processing failure.
///
/// `item` carries the input value that caused the failure. For failures that
/// originate outside any specific item (for example a stage that flattens
/// `T` into a different carrier type), `item` holds `T::default()`.
#[derive(Clone)]
pub struct StreamError<T> {
    /// The input value associated with this failure.
    pub item: T,
    /// The underlying cause.
    pub cause: Cause,
    /// Stable identifier of the stage that produced this failure. Never empty.
    pub processor_name: Arc<str>,
    /// Wall-clock moment of failure, as nanoseconds from the originating
    /// clock's epoch (see [`crate::clock::Timestamp`]).
    pub timestamp: u64,
}

impl<T> StreamError<T> {
    /// Constructs a new `StreamError`.
    ///
    /// # Panics
    ///
    /// Panics if `processor_name` is empty — the spec requires it non-empty.
    pub fn new(
        item: T,
        cause: impl StdError + Send + Sync + 'static,
        processor_name: impl Into<Arc<str>>,
        timestamp: u64,
    ) -> Self {
        let processor_name = processor_name.into();
        assert!(
            !processor_name.is_empty(),
            "StreamError::processor_name must be non-empty"
        );
        Self {
            item,
            cause: Arc::new(cause),
            processor_name,
            timestamp,
        }
    }

    /// Re-wraps this failure's item as a different value, preserving cause,
    /// processor name, and timestamp. Used by stages (e.g. `map`) whose
    /// output element type differs from their input element type.
    pub fn with_item<U>(self, item: U) -> StreamError<U> {
        StreamError {
            item,
            cause: self.cause,
            processor_name: self.processor_name,
            timestamp: self.timestamp,
        }
    }
}

impl<T> fmt::Debug for StreamError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamError")
            .field("processor_name", &self.processor_name)
            .field("cause", &self.cause.to_string())
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}

impl<T> fmt::Display for StreamError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] failed at t={}: {}",
            self.processor_name, self.timestamp, self.cause
        )
    }
}

/// A plain string cause, for stages that only have a message, not a
/// `std::error::Error`-implementing value.
#[derive(Debug)]
pub struct Message(pub String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl StdError for Message {}

/// The core Result-wrapped stream item: a success value, or a structured
/// stream failure. Immutable once constructed.
#[derive(Clone)]
pub enum Result<T> {
    /// A successfully produced value, with optional metadata.
    Success {
        /// The value.
        value: T,
        /// Attached metadata, if any.
        metadata: Metadata,
    },
    /// A per-item processing failure, with optional metadata.
    Failure {
        /// The structured failure record.
        error: StreamError<T>,
        /// Attached metadata, if any.
        metadata: Metadata,
    },
}

impl<T> Result<T> {
    /// Constructs a success with no metadata.
    pub fn success(value: T) -> Self {
        Self::Success {
            value,
            metadata: Metadata::none(),
        }
    }

    /// Constructs a failure with no metadata.
    pub fn failure(
        item: T,
        cause: impl StdError + Send + Sync + 'static,
        processor_name: impl Into<Arc<str>>,
        timestamp: u64,
    ) -> Self {
        Self::Failure {
            error: StreamError::new(item, cause, processor_name, timestamp),
            metadata: Metadata::none(),
        }
    }

    /// Wraps an already-constructed [`StreamError`] as a failure.
    pub fn from_error(error: StreamError<T>) -> Self {
        Self::Failure {
            error,
            metadata: Metadata::none(),
        }
    }

    /// Returns `true` for [`Result::Success`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Returns `true` for [`Result::Failure`].
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    /// Returns a reference to the success value.
    ///
    /// # Panics
    ///
    /// Panics if this is a [`Result::Failure`] — inspecting the wrong variant
    /// is a programming error per the spec's error taxonomy.
    #[must_use]
    pub fn value(&self) -> &T {
        match self {
            Self::Success { value, .. } => value,
            Self::Failure { .. } => panic!("Result::value() called on a Failure"),
        }
    }

    /// Consumes this result, returning the success value.
    ///
    /// # Panics
    ///
    /// Panics if this is a [`Result::Failure`].
    #[must_use]
    pub fn into_value(self) -> T {
        match self {
            Self::Success { value, .. } => value,
            Self::Failure { .. } => panic!("Result::into_value() called on a Failure"),
        }
    }

    /// Returns a reference to the failure record.
    ///
    /// # Panics
    ///
    /// Panics if this is a [`Result::Success`].
    #[must_use]
    pub fn error(&self) -> &StreamError<T> {
        match self {
            Self::Failure { error, .. } => error,
            Self::Success { .. } => panic!("Result::error() called on a Success"),
        }
    }

    /// Consumes this result, returning the failure record.
    ///
    /// # Panics
    ///
    /// Panics if this is a [`Result::Success`].
    #[must_use]
    pub fn into_error(self) -> StreamError<T> {
        match self {
            Self::Failure { error, .. } => error,
            Self::Success { .. } => panic!("Result::into_error() called on a Success"),
        }
    }

    /// Returns a new `Result` with `key` set to `value` in its metadata.
    /// The receiver is unchanged.
    #[must_use]
    pub fn with_metadata(&self, key: impl Into<String>, value: impl Into<Value>) -> Self
    where
        T: Clone,
    {
        match self {
            Self::Success { value: v, metadata } => Self::Success {
                value: v.clone(),
                metadata: metadata.with(key, value),
            },
            Self::Failure { error, metadata } => Self::Failure {
                error: error.clone(),
                metadata: metadata.with(key, value),
            },
        }
    }

    /// Looks up a metadata key.
    #[must_use]
    pub fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata().get(key)
    }

    /// Returns this item's metadata.
    #[must_use]
    pub const fn metadata(&self) -> &Metadata {
        match self {
            Self::Success { metadata, .. } | Self::Failure { metadata, .. } => metadata,
        }
    }

    /// Maps the success value type, leaving failures structurally intact but
    /// re-typed (via `StreamError::with_item`, using `U::default()` since the
    /// original item can't be produced without calling `f`).
    pub fn map_value<U: Default>(self, f: impl FnOnce(T) -> U) -> Result<U> {
        match self {
            Self::Success { value, metadata } => Result::Success {
                value: f(value),
                metadata,
            },
            Self::Failure { error, metadata } => Result::Failure {
                error: error.with_item(U::default()),
                metadata,
            },
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Result<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success { value, metadata } => f
                .debug_struct("Success")
                .field("value", value)
                .field("metadata", metadata)
                .finish(),
            Self::Failure { error, metadata } => f
                .debug_struct("Failure")
                .field("error", error)
                .field("metadata", metadata)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_round_trips_value() {
        let r = Result::success(42);
        assert!(r.is_success());
        assert_eq!(*r.value(), 42);
    }

    #[test]
    fn failure_round_trips_error() {
        let r: Result<i32> = Result::failure(1, Message("boom".into()), "test-stage", 7);
        assert!(r.is_failure());
        assert_eq!(r.error().processor_name.as_ref(), "test-stage");
        assert_eq!(r.error().timestamp, 7);
    }

    #[test]
    #[should_panic(expected = "Failure")]
    fn value_on_failure_panics() {
        let r: Result<i32> = Result::failure(1, Message("boom".into()), "s", 0);
        let _ = r.value();
    }

    #[test]
    #[should_panic(expected = "Success")]
    fn error_on_success_panics() {
        let r = Result::success(1);
        let _ = r.error();
    }

    #[test]
    #[should_panic(expected = "non-empty")]
    fn empty_processor_name_panics() {
        let _: Result<i32> = Result::failure(1, Message("boom".into()), "", 0);
    }

    #[test]
    fn with_metadata_does_not_mutate_original() {
        let base = Result::success(1);
        let extended = base.with_metadata("k", 2i64);
        assert!(base.get_metadata("k").is_none());
        assert_eq!(extended.get_metadata("k"), Some(&Value::Int(2)));
    }

    #[test]
    fn map_value_transforms_success() {
        let r = Result::success(2).map_value(|v: i32| v * 10);
        assert_eq!(*r.value(), 20);
    }

    #[test]
    fn map_value_rewraps_failure_item() {
        let r: Result<i32> = Result::failure(5, Message("x".into()), "s", 1);
        let mapped: Result<String> = r.map_value(|v| v.to_string());
        assert!(mapped.is_failure());
        assert_eq!(mapped.error().item, String::default());
        assert_eq!(mapped.error().processor_name.as_ref(), "s");
    }
}
