//! flowcore: a channel-based stream-processing core.
//!
//! A set of composable pipeline [`stage`]s that transform lazy sequences of
//! typed items under a unified success-or-failure wrapper
//! ([`result::Result`]), with deterministic concurrency, cancellation, and
//! time-based behavior driven by an injected [`clock::Clock`] capability.
//!
//! # Module structure
//!
//! - [`result`]: the Result-wrapped stream model (C1) — [`result::Result`],
//!   [`result::StreamError`].
//! - [`metadata`]: optional, typed key-value annotations attached to a
//!   `Result` (§3).
//! - [`clock`]: the virtual clock abstraction (C2) — [`clock::Clock`],
//!   [`clock::RealClock`], [`clock::FakeClock`].
//! - [`cancel`]: the cancellation signal every stage observes.
//! - [`stage`]: the stage contract (C3) every transform, router, and
//!   windowing operator implements, plus [`stage::StageExt::pipe`] chaining.
//! - [`transforms`]: stateless transforms (C4) — map, filter, tap, sample.
//! - [`concurrent`]: concurrent transforms (C5) — ordered/unordered
//!   parallel map.
//! - [`routing`]: routing stages (C6, C11) — fan-in, fan-out, split,
//!   switch, partition, dead-letter split.
//! - [`flow_control`]: flow-control stages (C7) — buffer, throttle,
//!   debounce.
//! - [`batch`]: size-or-latency batching (C8).
//! - [`window`]: windowing (C9) — tumbling, sliding, session.
//! - [`dedupe`]: deduplication (C10) — bounded LRU cache with optional TTL.
//! - [`error`]: construction-time configuration errors (§7.1).
//!
//! # Error taxonomy
//!
//! Two distinct families, per §7: [`error::ConfigError`] for invalid stage
//! configuration (rejected synchronously at construction, never lazily on
//! the first item) and [`result::StreamError`] for per-item processing
//! failures, carried in-band as [`result::Result::Failure`].
//!
//! # Determinism
//!
//! Every time-and-state stage is generic over `Arc<dyn Clock>`. Swap in a
//! [`clock::FakeClock`] and drive it deterministically with
//! [`clock::FakeClock::advance`] to test batching, windowing, throttling,
//! debouncing, and TTL-based dedupe expiry without wall-clock sleeps.

pub mod batch;
pub mod cancel;
pub mod clock;
pub mod concurrent;
pub mod dedupe;
pub mod error;
pub mod flow_control;
pub mod metadata;
pub mod result;
pub mod routing;
pub mod stage;
pub mod transforms;
pub mod window;

#[cfg(test)]
pub(crate) mod test_support;

pub use cancel::{CancelKind, CancelReason, CancelToken};
pub use clock::{Clock, FakeClock, RealClock, Ticker, Timer, TimerHandle, Timestamp};
pub use error::{ConfigError, StreamResult};
pub use metadata::{keys, Metadata, Value};
pub use result::{Cause, Message, Result, StreamError};
pub use stage::{channel, Stage, StageExt, StreamReceiver, StreamSender, CHANNEL_CAPACITY};
