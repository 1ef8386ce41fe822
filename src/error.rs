//! Construction-time error taxonomy (§7.1).
//!
//! Per-item failures travel in-band as [`crate::result::Result::Failure`];
//! this module covers the other kind of failure the spec names — rejecting
//! an invalid stage configuration synchronously, at construction, rather
//! than lazily on the first item.

use thiserror::Error;

/// Every way a stage's configuration can be rejected at construction.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// `sample`'s rate was NaN, infinite, or outside `[0.0, 1.0]`.
    #[error("sample rate {0} is not a finite value in [0.0, 1.0]")]
    InvalidSampleRate(f64),
    /// `parallel-map`'s worker count was zero.
    #[error("parallel-map worker count must be >= 1, got 0")]
    ZeroWorkers,
    /// `fan-out`'s output count was zero.
    #[error("fan-out output count must be >= 1, got 0")]
    ZeroOutputs,
    /// `partition`'s partition count was zero.
    #[error("partition count must be >= 1, got 0")]
    ZeroPartitions,
    /// A buffer's capacity was zero.
    #[error("buffer capacity must be >= 1, got 0")]
    ZeroBufferCapacity,
    /// `throttle`'s duration was zero or negative-equivalent.
    #[error("throttle duration must be > 0")]
    NonPositiveThrottleDuration,
    /// `debounce`'s duration was zero.
    #[error("debounce duration must be > 0")]
    NonPositiveDebounceDuration,
    /// `batcher`'s `max_size` was zero.
    #[error("batcher max_size must be >= 1, got 0")]
    ZeroBatchSize,
    /// `batcher`'s `max_latency` was zero.
    #[error("batcher max_latency must be > 0")]
    NonPositiveBatchLatency,
    /// A window's size was zero.
    #[error("window size must be > 0")]
    NonPositiveWindowSize,
    /// Sliding window's slide was zero, or exceeded its size.
    #[error("sliding window slide {slide:?} must be > 0 and <= size {size:?}")]
    InvalidSlide {
        /// The configured slide.
        slide: std::time::Duration,
        /// The configured size.
        size: std::time::Duration,
    },
    /// Session window's gap was zero.
    #[error("session window gap must be > 0")]
    NonPositiveSessionGap,
    /// Dead-letter-split's stall timeout was zero.
    #[error("dead-letter-split timeout must be > 0")]
    NonPositiveTimeout,
}

/// Rust's ambient `core::result::Result`, distinct from the domain
/// [`crate::result::Result`] stream wrapper — aliased to avoid the name
/// collision at call sites that need both.
pub type StreamResult<T> = core::result::Result<T, ConfigError>;
