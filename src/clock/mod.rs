//! The virtual clock abstraction (C2).
//!
//! A [`Clock`] is an injected capability providing current time, one-shot
//! timers, and periodic tickers. [`RealClock`](real::RealClock) and
//! [`FakeClock`](fake::FakeClock) are interchangeable: every time-and-state
//! stage is generic over `Arc<dyn Clock>`, so tests can swap in a fake clock
//! and drive it deterministically with [`fake::FakeClock::advance`].

pub mod fake;
pub mod real;

pub use fake::FakeClock;
pub use real::RealClock;

use crossbeam_channel::Receiver;
use std::ops::{Add, Sub};
use std::sync::Arc;
use std::time::Duration;

/// A point in time on some clock's own timeline, in nanoseconds since that
/// clock's epoch. Not comparable across different clock instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// The clock's epoch (t=0).
    pub const ZERO: Self = Self(0);

    /// Nanoseconds since the clock's epoch.
    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Duration since `earlier`, or `Duration::ZERO` if `earlier` is later
    /// than `self`.
    #[must_use]
    pub fn saturating_duration_since(self, earlier: Self) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for Timestamp {
    type Output = Self;
    fn add(self, rhs: Duration) -> Self {
        Self(self.0.saturating_add(rhs.as_nanos().min(u128::from(u64::MAX)) as u64))
    }
}

impl Sub<Duration> for Timestamp {
    type Output = Self;
    fn sub(self, rhs: Duration) -> Self {
        Self(self.0.saturating_sub(rhs.as_nanos().min(u128::from(u64::MAX)) as u64))
    }
}

impl Sub for Timestamp {
    type Output = Duration;
    fn sub(self, rhs: Self) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(rhs.0))
    }
}

#[inline]
pub(crate) fn duration_to_nanos_saturating(duration: Duration) -> u64 {
    duration.as_nanos().min(u128::from(u64::MAX)) as u64
}

/// Control surface shared by one-shot timers.
pub(crate) trait TimerControl: Send + Sync {
    fn reset(&self, duration: Duration);
    /// Returns whether the timer was still pending (not yet fired or stopped).
    fn stop(&self) -> bool;
}

/// Control surface shared by periodic tickers and `after_func` handles.
pub(crate) trait StopControl: Send + Sync {
    fn stop(&self) -> bool;
}

/// A one-shot timer. Fires at most once on [`receiver`](Self::receiver)
/// unless stopped first.
///
/// States: `pending -> fired` (on due) or `pending -> stopped` (on `stop()`
/// or `reset()` before firing — `reset()` re-enters `pending`). Stopping an
/// already-stopped or already-fired timer is a no-op that returns `false`.
pub struct Timer {
    rx: Receiver<()>,
    control: Arc<dyn TimerControl>,
}

impl Timer {
    pub(crate) fn new(rx: Receiver<()>, control: Arc<dyn TimerControl>) -> Self {
        Self { rx, control }
    }

    /// The channel that receives a single `()` when the timer fires. Select
    /// on this alongside input/cancellation channels.
    #[must_use]
    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }

    /// Re-arms the timer for `duration` from now, discarding any pending
    /// firing.
    pub fn reset(&self, duration: Duration) {
        self.control.reset(duration);
    }

    /// Stops the timer. Returns `true` if it was still pending.
    pub fn stop(&self) -> bool {
        self.control.stop()
    }
}

/// A periodic ticker. Fires repeatedly on [`receiver`](Self::receiver) every
/// configured interval until stopped.
pub struct Ticker {
    rx: Receiver<()>,
    control: Arc<dyn StopControl>,
}

impl Ticker {
    pub(crate) fn new(rx: Receiver<()>, control: Arc<dyn StopControl>) -> Self {
        Self { rx, control }
    }

    /// The channel that receives a `()` on every tick.
    #[must_use]
    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }

    /// Stops the ticker. Returns `true` if it was still active.
    pub fn stop(&self) -> bool {
        self.control.stop()
    }
}

/// A stoppable handle returned by [`Clock::after_func`].
pub struct TimerHandle {
    control: Arc<dyn StopControl>,
}

impl TimerHandle {
    pub(crate) fn new(control: Arc<dyn StopControl>) -> Self {
        Self { control }
    }

    /// Stops the scheduled callback from running, if it has not already run.
    /// Returns `true` if it was still pending.
    pub fn stop(&self) -> bool {
        self.control.stop()
    }
}

/// Capability providing current time, one-shot timers, and periodic tickers.
///
/// Every method must be safe to call concurrently from multiple threads; a
/// `Clock` is shared by reference (as `Arc<dyn Clock>`) across every stage
/// in a pipeline.
pub trait Clock: Send + Sync {
    /// The current time on this clock's timeline.
    fn now(&self) -> Timestamp;

    /// Creates a one-shot timer that fires after `duration` unless stopped
    /// or reset first.
    fn new_timer(&self, duration: Duration) -> Timer;

    /// Creates a periodic ticker that fires every `interval` until stopped.
    fn new_ticker(&self, interval: Duration) -> Ticker;

    /// Schedules `f` to run after `duration`. Returns a handle that can stop
    /// the callback before it runs.
    fn after_func(&self, duration: Duration, f: Box<dyn FnOnce() + Send>) -> TimerHandle;

    /// Convenience: a timer that fires at `deadline` (or immediately, if
    /// `deadline` is already in the past).
    fn sleep_until(&self, deadline: Timestamp) -> Timer {
        let duration = deadline.saturating_duration_since(self.now());
        self.new_timer(duration)
    }

    /// Convenience alias for [`Clock::after_func`], matching the naming used
    /// elsewhere for sleep/timeout primitives.
    fn after(&self, duration: Duration, f: Box<dyn FnOnce() + Send>) -> TimerHandle {
        self.after_func(duration, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_arithmetic_saturates() {
        let t = Timestamp::ZERO;
        assert_eq!(t - Duration::from_secs(1), Timestamp::ZERO);
        let t2 = t + Duration::from_nanos(100);
        assert_eq!(t2.as_nanos(), 100);
        assert_eq!(t2.saturating_duration_since(t), Duration::from_nanos(100));
        assert_eq!(t.saturating_duration_since(t2), Duration::ZERO);
    }
}
