//! Deduplication (C10): emits each success at most once per active key,
//! backed by a bounded LRU cache with an optional TTL.
//!
//! Single-event-loop discipline, as mandated for every stateful stage in
//! this crate (§4.7, §4.10, §9): one worker owns the cache exclusively;
//! external callers only ever read an `AtomicU64`-backed counters snapshot,
//! never lock into the worker's state.

use crate::cancel::CancelToken;
use crate::clock::{Clock, Ticker, Timestamp};
use crate::result::{Message, Result};
use crate::stage::{channel, Stage, StreamReceiver, StreamSender};
use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Default bound on the number of distinct keys remembered at once, per
/// `spec.md` §4.10's "Configurable `max_size` (default 10 000)".
pub const DEFAULT_MAX_SIZE: usize = 10_000;

/// Default cleanup ticker interval when a `ttl` is configured, per
/// `spec.md` §4.10's "default 1 minute".
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Live observable counters for a [`Dedupe`] stage, per §4.10's "Exposed
/// counters: hits, misses, evictions, current size".
#[derive(Default)]
pub struct DedupeCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    size: AtomicU64,
}

/// A point-in-time snapshot of a [`Dedupe`] stage's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupeCountersSnapshot {
    /// Successes recognized as repeats of an already-cached key.
    pub hits: u64,
    /// Successes treated as new (key absent or expired).
    pub misses: u64,
    /// Entries evicted to make room once `max_size` was reached.
    pub evictions: u64,
    /// Current number of entries in the cache.
    pub size: u64,
}

impl DedupeCounters {
    /// A live snapshot of this stage's counters.
    #[must_use]
    pub fn snapshot(&self) -> DedupeCountersSnapshot {
        DedupeCountersSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size: self.size.load(Ordering::Relaxed),
        }
    }
}

enum Cache<K> {
    Bounded(LruCache<K, Timestamp>),
    Unbounded(LruCache<K, Timestamp>),
}

impl<K: Hash + Eq> Cache<K> {
    fn new(max_size: usize) -> Self {
        match NonZeroUsize::new(max_size) {
            Some(n) => Self::Bounded(LruCache::new(n)),
            None => Self::Unbounded(LruCache::unbounded()),
        }
    }

    fn inner(&mut self) -> &mut LruCache<K, Timestamp> {
        match self {
            Self::Bounded(c) | Self::Unbounded(c) => c,
        }
    }
}

/// Given a key function `T -> K`, emits each success at most once per
/// distinct key; subsequent duplicates are dropped. Failures always pass
/// through unchanged. `max_size == 0` means unbounded (discouraged, per
/// §4.10, but accepted rather than rejected at construction — the spec
/// lists it as a valid, if ill-advised, configuration).
pub struct Dedupe<T, K, F> {
    name: &'static str,
    max_size: usize,
    ttl: Option<Duration>,
    cleanup_interval: Duration,
    key_fn: F,
    clock: Arc<dyn Clock>,
    counters: Arc<DedupeCounters>,
    _marker: std::marker::PhantomData<fn(&T) -> K>,
}

impl<T, K, F> Dedupe<T, K, F>
where
    K: Hash + Eq + Clone + Send + 'static,
    F: FnMut(&T) -> K + Send + 'static,
{
    /// Creates a new `dedupe` stage with the default `max_size` (10 000)
    /// and no TTL.
    pub fn new(name: &'static str, key_fn: F, clock: Arc<dyn Clock>) -> Self {
        Self {
            name,
            max_size: DEFAULT_MAX_SIZE,
            ttl: None,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            key_fn,
            clock,
            counters: Arc::new(DedupeCounters::default()),
            _marker: std::marker::PhantomData,
        }
    }

    /// Overrides the cache's maximum size. `0` means unbounded.
    #[must_use]
    pub const fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Arms a TTL: entries older than `ttl` are treated as absent on
    /// lookup, and periodically purged by a cleanup ticker.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Overrides the cleanup ticker interval (only armed when a TTL is
    /// configured).
    #[must_use]
    pub const fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// A live handle to this stage's observable counters. Clone it before
    /// calling `process` (which consumes the stage).
    #[must_use]
    pub fn counters(&self) -> Arc<DedupeCounters> {
        Arc::clone(&self.counters)
    }
}

enum Event<T> {
    Cancelled,
    CleanupTick,
    Input(core::result::Result<Result<T>, crossbeam_channel::RecvError>),
}

impl<T, K, F> Stage for Dedupe<T, K, F>
where
    T: Send + 'static,
    K: Hash + Eq + Clone + Send + 'static,
    F: FnMut(&T) -> K + Send + 'static,
{
    type In = T;
    type Out = T;

    fn process(
        self: Box<Self>,
        cancel_signal: CancelToken,
        input: StreamReceiver<Self::In>,
    ) -> StreamReceiver<Self::Out> {
        let Self {
            name,
            max_size,
            ttl,
            cleanup_interval,
            mut key_fn,
            clock,
            counters,
            ..
        } = *self;
        let (tx, rx): (StreamSender<T>, StreamReceiver<T>) = channel();

        #[cfg(feature = "tracing-integration")]
        tracing::debug!(stage = name, max_size, ttl = ?ttl, "dedupe stage constructed");

        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut cache: Cache<K> = Cache::new(max_size);
                let cleanup_ticker: Option<Ticker> =
                    ttl.filter(|t| !t.is_zero()).map(|_| clock.new_ticker(cleanup_interval));

                loop {
                    let event = match &cleanup_ticker {
                        Some(t) => crossbeam_channel::select! {
                            recv(cancel_signal.gate()) -> _ => Event::Cancelled,
                            recv(input) -> msg => Event::Input(msg),
                            recv(t.receiver()) -> _ => Event::CleanupTick,
                        },
                        None => crossbeam_channel::select! {
                            recv(cancel_signal.gate()) -> _ => Event::Cancelled,
                            recv(input) -> msg => Event::Input(msg),
                        },
                    };

                    match event {
                        Event::Cancelled => {
                            if let Some(t) = &cleanup_ticker {
                                t.stop();
                            }
                            break;
                        }
                        Event::CleanupTick => {
                            let now = clock.now();
                            if let Some(ttl) = ttl {
                                let expired: Vec<K> = cache
                                    .inner()
                                    .iter()
                                    .filter(|(_, &seen_at)| now.saturating_duration_since(seen_at) >= ttl)
                                    .map(|(k, _)| k.clone())
                                    .collect();
                                for key in expired {
                                    cache.inner().pop(&key);
                                }
                                counters.size.store(cache.inner().len() as u64, Ordering::Relaxed);
                            }
                        }
                        Event::Input(Ok(Result::Success { value, metadata })) => {
                            let key = match catch_unwind(AssertUnwindSafe(|| key_fn(&value))) {
                                Ok(key) => key,
                                Err(panic) => {
                                    let message = panic
                                        .downcast_ref::<&str>()
                                        .map(|s| (*s).to_string())
                                        .or_else(|| panic.downcast_ref::<String>().cloned())
                                        .unwrap_or_else(|| "dedupe key function panicked".to_string());
                                    let failure = Result::failure(value, Message(message), name, clock.now().as_nanos());
                                    if tx.send(failure).is_err() {
                                        break;
                                    }
                                    continue;
                                }
                            };
                            let now = clock.now();
                            let fresh = cache.inner().peek(&key).is_some_and(|&seen_at| {
                                ttl.is_none_or(|ttl| now.saturating_duration_since(seen_at) < ttl)
                            });
                            if fresh {
                                counters.hits.fetch_add(1, Ordering::Relaxed);
                                continue;
                            }
                            counters.misses.fetch_add(1, Ordering::Relaxed);
                            let evicted = cache.inner().put(key, now);
                            if evicted.is_some() {
                                counters.evictions.fetch_add(1, Ordering::Relaxed);
                            }
                            counters.size.store(cache.inner().len() as u64, Ordering::Relaxed);
                            if tx.send(Result::Success { value, metadata }).is_err() {
                                break;
                            }
                        }
                        Event::Input(Ok(failure @ Result::Failure { .. })) => {
                            if tx.send(failure).is_err() {
                                break;
                            }
                        }
                        Event::Input(Err(_)) => {
                            if let Some(t) = &cleanup_ticker {
                                t.stop();
                            }
                            break;
                        }
                    }
                }
            })
            .expect("spawn dedupe worker");

        rx
    }

    fn name(&self) -> &str {
        self.name
    }
}
