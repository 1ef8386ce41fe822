//! Optional, typed key-value annotations attached to a [`crate::result::Result`].
//!
//! Metadata is designed to be zero-overhead when unused: a `Result` with no
//! metadata stores `None` and performs no allocation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Reserved metadata keys emitted by core stages.
///
/// Implementers MUST use these keys when emitting the corresponding
/// annotation so that downstream consumers can rely on a stable vocabulary.
pub mod keys {
    /// Start timestamp of a window (nanoseconds on the clock that produced it).
    pub const WINDOW_START: &str = "window_start";
    /// End timestamp of a window.
    pub const WINDOW_END: &str = "window_end";
    /// Kind of window: `"tumbling"`, `"sliding"`, or `"session"`.
    pub const WINDOW_TYPE: &str = "window_type";
    /// Configured window size.
    pub const WINDOW_SIZE: &str = "window_size";
    /// Configured slide interval (sliding window only).
    pub const WINDOW_SLIDE: &str = "window_slide";
    /// Configured session gap (session window only).
    pub const WINDOW_GAP: &str = "window_gap";
    /// Session grouping key (session window only).
    pub const WINDOW_SESSION_KEY: &str = "window_session_key";
    /// Output index selected by the partition stage.
    pub const PARTITION_INDEX: &str = "partition_index";
    /// Route string selected by the switch stage.
    pub const ROUTE: &str = "route";
}

/// A typed value that can be attached to a `Result` as metadata.
///
/// Heterogeneous on purpose: the reserved keys in [`keys`] carry different
/// shapes (timestamps, durations, strings, integers, enums), and user code
/// may attach its own keys with values of its own choosing.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A nanosecond timestamp, as produced by `Clock::now()`.
    Timestamp(u64),
    /// A duration.
    Duration(Duration),
    /// A UTF-8 string.
    String(Arc<str>),
    /// A signed integer.
    Int(i64),
    /// A non-negative integer (partition index, counts).
    UInt(u64),
    /// A floating-point number.
    Float(f64),
    /// A boolean.
    Bool(bool),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timestamp(ns) => write!(f, "{ns}ns"),
            Self::Duration(d) => write!(f, "{d:?}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::UInt(u) => write!(f, "{u}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(Arc::from(s.as_str()))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<Duration> for Value {
    fn from(v: Duration) -> Self {
        Self::Duration(v)
    }
}

/// An unordered, optional string-keyed map of [`Value`]s.
///
/// `Metadata::none()` stores nothing and allocates nothing; the map is only
/// allocated on the first `with` call, matching the spec's "absent metadata
/// must not allocate" invariant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    entries: Option<Arc<HashMap<String, Value>>>,
}

impl Metadata {
    /// Returns an empty, non-allocating metadata map.
    #[must_use]
    pub const fn none() -> Self {
        Self { entries: None }
    }

    /// Returns `true` if no entries have been set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.as_deref().is_none_or(HashMap::is_empty)
    }

    /// Returns a new `Metadata` with `key` set to `value`, leaving `self`
    /// unchanged. Unknown keys are passed through untouched by every other
    /// stage.
    #[must_use]
    pub fn with(&self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut map = self
            .entries
            .as_deref()
            .cloned()
            .unwrap_or_default();
        map.insert(key.into(), value.into());
        Self {
            entries: Some(Arc::new(map)),
        }
    }

    /// Looks up a key, returning `None` if absent.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.as_deref().and_then(|m| m.get(key))
    }

    /// Iterates over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries
            .as_deref()
            .into_iter()
            .flat_map(|m| m.iter().map(|(k, v)| (k.as_str(), v)))
    }
}
