//! Cancellation signal observed by every stage.
//!
//! Cancellation here is deliberately simpler than a full structured-concurrency
//! protocol: a [`CancelToken`] is a one-shot, cloneable capability. Once fired
//! it stays fired. Every stage worker loop selects on the token's gate
//! alongside its input and timer channels so cancellation is observed promptly
//! at every suspension point, never polled after the fact.

use crossbeam_channel::Receiver;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The kind of cancellation request, ordered by severity for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CancelKind {
    /// Explicit cancellation requested by caller code.
    User,
    /// Cancellation due to a caller-side timeout/deadline.
    Timeout,
    /// Cancellation cascading from a sibling stage's shutdown.
    Upstream,
}

impl fmt::Display for CancelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Timeout => write!(f, "timeout"),
            Self::Upstream => write!(f, "upstream"),
        }
    }
}

/// Why a [`CancelToken`] was fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelReason {
    /// The kind of cancellation.
    pub kind: CancelKind,
    /// Optional static human-readable context.
    pub message: Option<&'static str>,
}

impl CancelReason {
    /// Creates a reason with no message.
    #[must_use]
    pub const fn new(kind: CancelKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    /// A user-initiated cancellation with a message.
    #[must_use]
    pub const fn user(message: &'static str) -> Self {
        Self {
            kind: CancelKind::User,
            message: Some(message),
        }
    }

    /// A timeout-driven cancellation.
    #[must_use]
    pub const fn timeout() -> Self {
        Self::new(CancelKind::Timeout)
    }
}

impl Default for CancelReason {
    fn default() -> Self {
        Self::new(CancelKind::User)
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(msg) = self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

struct Inner {
    cancelled: AtomicBool,
    reason: parking_lot::Mutex<Option<CancelReason>>,
    // Dropping this sender closes `gate_rx` for every clone, which makes the
    // channel immediately selectable (as a disconnect) in a `select!` alongside
    // input/timer channels. Holding it behind a lock lets `cancel` drop it
    // exactly once to broadcast the wakeup.
    gate_tx: parking_lot::Mutex<Option<crossbeam_channel::Sender<()>>>,
    gate_rx: Receiver<()>,
}

/// A one-shot, cloneable cancellation capability.
///
/// Cloning a `CancelToken` shares the same underlying signal: firing any
/// clone fires all of them. This is the "external cancellation signal"
/// every stage's `process()` call receives.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    /// Creates a new, not-yet-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(0);
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                reason: parking_lot::Mutex::new(None),
                gate_tx: parking_lot::Mutex::new(Some(tx)),
                gate_rx: rx,
            }),
        }
    }

    /// Fires the token. Idempotent; only the first call's reason is recorded.
    ///
    /// Dropping the internal sender closes `gate()` for every outstanding
    /// clone, so any worker parked in a `select!` on it wakes immediately.
    pub fn cancel(&self, reason: CancelReason) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            *self.inner.reason.lock() = Some(reason);
            self.inner.gate_tx.lock().take();
        }
    }

    /// Returns `true` once `cancel` has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the recorded reason, if cancelled.
    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        self.inner.reason.lock().clone()
    }

    /// The channel a stage worker selects on alongside its input and timer
    /// channels. It never carries a value: `cancel()` closes it, which makes
    /// a `recv()` on this channel (or a `select!` branch registered on it)
    /// resolve immediately with a disconnect, exactly the prompt wakeup the
    /// stage contract requires at every suspension point.
    #[must_use]
    pub fn gate(&self) -> &Receiver<()> {
        &self.inner.gate_rx
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
