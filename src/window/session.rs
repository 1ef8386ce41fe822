//! session window (C9): a dynamic per-key window that extends while
//! activity on that key continues within `gap`.
//!
//! A single event loop owns the session map — no timer-per-session. A
//! periodic check every `gap / 4` inspects every session's deadline; this
//! trades average closure latency of `gap / 8` (maximum `gap / 4`) for the
//! deadlock-free determinism the spec calls out as deliberate and
//! non-negotiable (§4.9, §9: "MUST be preserved").
//!
//! The key function's signature is `Result<T> -> String` (per `spec.md`
//! §6's `session window` row), so failures participate in session keying
//! exactly like successes — resolving §9.OQ4 without guessing, since the
//! spec already pins the signature.

use super::window_metadata;
use crate::cancel::CancelToken;
use crate::clock::{Clock, Ticker, Timestamp};
use crate::error::{ConfigError, StreamResult};
use crate::metadata::keys;
use crate::result::Result;
use crate::stage::{channel, Stage, StreamReceiver, StreamSender};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

struct SessionState<T> {
    items: Vec<Result<T>>,
    start: Timestamp,
    last_activity: Timestamp,
    deadline: Timestamp,
}

/// A dynamic window per key, extended on each item for that key arriving
/// within `gap` of the previous one, emitted once `gap` elapses with no
/// further activity (or on stream completion).
pub struct Session<T, F> {
    name: &'static str,
    gap: Duration,
    key_fn: F,
    clock: Arc<dyn Clock>,
    _marker: std::marker::PhantomData<fn(&Result<T>) -> String>,
}

impl<T, F> Session<T, F>
where
    F: FnMut(&Result<T>) -> String + Send + 'static,
{
    /// Creates a new `session` window stage. Rejects a zero `gap` at
    /// construction.
    pub fn new(name: &'static str, gap: Duration, key_fn: F, clock: Arc<dyn Clock>) -> StreamResult<Self> {
        if gap.is_zero() {
            return Err(ConfigError::NonPositiveSessionGap);
        }
        Ok(Self {
            name,
            gap,
            key_fn,
            clock,
            _marker: std::marker::PhantomData,
        })
    }
}

enum Event<T> {
    Cancelled,
    Tick,
    Input(core::result::Result<Result<T>, crossbeam_channel::RecvError>),
}

impl<T, F> Stage for Session<T, F>
where
    T: Send + 'static,
    F: FnMut(&Result<T>) -> String + Send + 'static,
{
    type In = T;
    type Out = Vec<Result<T>>;

    fn process(
        self: Box<Self>,
        cancel_signal: CancelToken,
        input: StreamReceiver<Self::In>,
    ) -> StreamReceiver<Self::Out> {
        let Self { name, gap, mut key_fn, clock, .. } = *self;
        let (tx, rx): (StreamSender<Vec<Result<T>>>, StreamReceiver<Vec<Result<T>>>) = channel();

        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut sessions: HashMap<String, SessionState<T>> = HashMap::new();
                let check_interval = gap / 4;
                let ticker: Ticker = clock.new_ticker(check_interval);

                let emit_due = |sessions: &mut HashMap<String, SessionState<T>>, now: Timestamp, force_all: bool| {
                    let mut due_keys: Vec<String> = sessions
                        .iter()
                        .filter(|(_, s)| force_all || s.deadline <= now)
                        .map(|(k, _)| k.clone())
                        .collect();
                    due_keys.sort_unstable();
                    let mut out = Vec::with_capacity(due_keys.len());
                    for key in due_keys {
                        let Some(state) = sessions.remove(&key) else { continue };
                        let metadata = window_metadata(state.start, state.last_activity, gap, "session")
                            .with(keys::WINDOW_GAP, gap)
                            .with(keys::WINDOW_SESSION_KEY, key);
                        out.push(Result::Success {
                            value: state.items,
                            metadata,
                        });
                    }
                    out
                };

                loop {
                    let event = crossbeam_channel::select! {
                        recv(cancel_signal.gate()) -> _ => Event::Cancelled,
                        recv(input) -> msg => Event::Input(msg),
                        recv(ticker.receiver()) -> _ => Event::Tick,
                    };

                    match event {
                        Event::Cancelled => {
                            ticker.stop();
                            break;
                        }
                        Event::Tick => {
                            let now = clock.now();
                            for session in emit_due(&mut sessions, now, false) {
                                if tx.send(session).is_err() {
                                    return;
                                }
                            }
                        }
                        Event::Input(Ok(item)) => {
                            let now = clock.now();
                            let key = key_fn(&item);
                            sessions
                                .entry(key)
                                .and_modify(|s| {
                                    s.last_activity = now;
                                    s.deadline = now + gap;
                                })
                                .or_insert_with(|| SessionState {
                                    items: Vec::new(),
                                    start: now,
                                    last_activity: now,
                                    deadline: now + gap,
                                })
                                .items
                                .push(item);
                        }
                        Event::Input(Err(_)) => {
                            ticker.stop();
                            let now = clock.now();
                            for session in emit_due(&mut sessions, now, true) {
                                let _ = tx.send(session);
                            }
                            break;
                        }
                    }
                }
            })
            .expect("spawn session window worker");

        rx
    }

    fn name(&self) -> &str {
        self.name
    }
}
