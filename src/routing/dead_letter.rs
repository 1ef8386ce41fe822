//! dead-letter split (1→2 success/failure bifurcation, C11).
//!
//! **Stall policy resolved** (per `SPEC_FULL.md` §C.3): the stage never
//! blocks indefinitely on a stalled consumer. Each send is bounded by a
//! clock-driven timeout (default 5s, configurable); on timeout the item is
//! dropped from that side only and processing continues — the other side's
//! consumer is not penalized by one slow neighbor.

use crate::cancel::CancelToken;
use crate::clock::Clock;
use crate::error::{ConfigError, StreamResult};
use crate::result::Result;
use crate::stage::{channel, StreamReceiver, StreamSender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Default stall timeout for [`DeadLetterSplit`] sends, per `spec.md` §9's
/// "short timeout" and `SPEC_FULL.md`'s pinned default of 5 seconds.
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(5);

/// The two output streams produced by [`DeadLetterSplit::process`].
pub struct DeadLetterOutputs<T> {
    /// Every `Result::Success` item.
    pub primary: StreamReceiver<T>,
    /// Every `Result::Failure` item.
    pub dead_letters: StreamReceiver<T>,
}

/// One input, two outputs: successes to `primary`, failures to
/// `dead_letters`. Every item is forwarded to exactly one output. A send
/// that cannot complete within `stall_timeout` is abandoned for that item
/// only — the stage keeps processing the rest of the input rather than
/// deadlocking on one stalled consumer.
pub struct DeadLetterSplit<T> {
    name: &'static str,
    stall_timeout: Duration,
    clock: Arc<dyn Clock>,
    _marker: std::marker::PhantomData<T>,
}

impl<T> DeadLetterSplit<T> {
    /// Creates a new `dead-letter-split` stage with the default 5s stall
    /// timeout.
    pub fn new(name: &'static str, clock: Arc<dyn Clock>) -> Self {
        Self {
            name,
            stall_timeout: DEFAULT_STALL_TIMEOUT,
            clock,
            _marker: std::marker::PhantomData,
        }
    }

    /// Overrides the stall timeout. Rejects a zero duration at construction.
    pub fn with_stall_timeout(mut self, timeout: Duration) -> StreamResult<Self> {
        if timeout.is_zero() {
            return Err(ConfigError::NonPositiveTimeout);
        }
        self.stall_timeout = timeout;
        Ok(self)
    }
}

impl<T> DeadLetterSplit<T>
where
    T: Send + 'static,
{
    /// Runs the dead-letter split, returning both output streams.
    pub fn process(self, cancel_signal: CancelToken, input: StreamReceiver<T>) -> DeadLetterOutputs<T> {
        let Self {
            name,
            stall_timeout,
            clock,
            ..
        } = self;
        let (primary_tx, primary_rx): (StreamSender<T>, StreamReceiver<T>) = channel();
        let (dl_tx, dl_rx): (StreamSender<T>, StreamReceiver<T>) = channel();

        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || 'outer: loop {
                let item: Result<T> = crossbeam_channel::select! {
                    recv(cancel_signal.gate()) -> _ => break 'outer,
                    recv(input) -> msg => match msg {
                        Ok(item) => item,
                        Err(_) => break 'outer,
                    },
                };
                let tx = if item.is_success() { &primary_tx } else { &dl_tx };
                match send_with_deadline(&cancel_signal, &clock, tx, item, stall_timeout) {
                    SendOutcome::Cancelled => break 'outer,
                    SendOutcome::Sent | SendOutcome::TimedOut | SendOutcome::Disconnected => {}
                }
            })
            .expect("spawn dead-letter-split worker");

        DeadLetterOutputs {
            primary: primary_rx,
            dead_letters: dl_rx,
        }
    }
}

enum SendOutcome {
    Sent,
    TimedOut,
    Disconnected,
    Cancelled,
}

/// Sends `item` on `tx`, bounded by `timeout` (driven by `clock`, so this
/// is deterministic under a fake clock) and by cancellation. A disconnected
/// receiver or an elapsed deadline both drop `item` for this side only;
/// only cancellation unwinds the caller's loop.
fn send_with_deadline<T>(
    cancel: &CancelToken,
    clock: &Arc<dyn Clock>,
    tx: &StreamSender<T>,
    item: Result<T>,
    timeout: Duration,
) -> SendOutcome {
    let deadline_timer = clock.new_timer(timeout);
    crossbeam_channel::select! {
        recv(cancel.gate()) -> _ => SendOutcome::Cancelled,
        recv(deadline_timer.receiver()) -> _ => SendOutcome::TimedOut,
        send(tx, item) -> res => {
            deadline_timer.stop();
            match res {
                Ok(()) => SendOutcome::Sent,
                Err(_) => SendOutcome::Disconnected,
            }
        }
    }
}
