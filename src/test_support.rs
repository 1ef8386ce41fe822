//! Test-only helpers shared across this crate's unit tests: draining a
//! stream with a bounded wait so a stuck stage fails the test instead of
//! hanging the run, and a one-shot logging initializer for tests that want
//! `tracing` output visible.

use crate::result::Result;
use crate::stage::StreamReceiver;
use std::sync::Once;
use std::time::Duration;

/// Default bound used by [`drain`] and [`collect_timeout`]. Generous enough
/// for any fake-clock-driven scenario in this crate's test suite, short
/// enough that a genuine hang surfaces as a test failure rather than a CI
/// timeout.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(5);

/// Collects every item from `rx` until it disconnects, waiting up to
/// [`DEFAULT_WAIT`] between items.
///
/// # Panics
///
/// Panics if no item arrives within `DEFAULT_WAIT` and the channel has not
/// disconnected — this is a hang, not an empty result.
pub fn drain<T>(rx: &StreamReceiver<T>) -> Vec<Result<T>> {
    collect_timeout(rx, DEFAULT_WAIT)
}

/// Collects every item from `rx` until it disconnects, waiting up to
/// `timeout` between items.
///
/// # Panics
///
/// Panics if no item arrives within `timeout` and the channel has not
/// disconnected.
pub fn collect_timeout<T>(rx: &StreamReceiver<T>, timeout: Duration) -> Vec<Result<T>> {
    let mut items = Vec::new();
    loop {
        match rx.recv_timeout(timeout) {
            Ok(item) => items.push(item),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                panic!("drain: no item within {timeout:?}; stage appears to have hung");
            }
        }
    }
    items
}

static LOGGING: Once = Once::new();

/// Initializes `tracing-subscriber` once per test process. Safe to call
/// from every test; later calls are no-ops.
#[cfg(feature = "tracing-integration")]
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// No-op when the `tracing-integration` feature is disabled, matching the
/// feature's "compiles to no-ops when disabled" guarantee.
#[cfg(not(feature = "tracing-integration"))]
pub fn init_test_logging() {
    LOGGING.call_once(|| {});
}
