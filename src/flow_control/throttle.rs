//! throttle (leading edge, C7).

use crate::cancel::CancelToken;
use crate::clock::{Clock, Timestamp};
use crate::error::{ConfigError, StreamResult};
use crate::result::Result;
use crate::stage::{channel, Stage, StreamReceiver, StreamSender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// On each success, emits it (and records the emission time) only if no
/// success has been emitted within the past `duration`; otherwise drops it.
/// Failures always pass through immediately, bypassing the cooldown.
pub struct Throttle<T> {
    name: &'static str,
    duration: Duration,
    clock: Arc<dyn Clock>,
    _marker: std::marker::PhantomData<T>,
}

impl<T> Throttle<T> {
    /// Creates a new `throttle` stage. Rejects a zero `duration` at
    /// construction.
    pub fn new(name: &'static str, duration: Duration, clock: Arc<dyn Clock>) -> StreamResult<Self> {
        if duration.is_zero() {
            return Err(ConfigError::NonPositiveThrottleDuration);
        }
        Ok(Self {
            name,
            duration,
            clock,
            _marker: std::marker::PhantomData,
        })
    }
}

impl<T> Stage for Throttle<T>
where
    T: Send + 'static,
{
    type In = T;
    type Out = T;

    fn process(
        self: Box<Self>,
        cancel_signal: CancelToken,
        input: StreamReceiver<Self::In>,
    ) -> StreamReceiver<Self::Out> {
        let Self { name, duration, clock, .. } = *self;
        let (tx, rx): (StreamSender<T>, StreamReceiver<T>) = channel();

        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut last_emit: Option<Timestamp> = None;
                loop {
                    crossbeam_channel::select! {
                        recv(cancel_signal.gate()) -> _ => break,
                        recv(input) -> msg => match msg {
                            Ok(item @ Result::Failure { .. }) => {
                                if tx.send(item).is_err() {
                                    break;
                                }
                            }
                            Ok(success @ Result::Success { .. }) => {
                                let now = clock.now();
                                let cooled_down = last_emit
                                    .is_none_or(|t| now.saturating_duration_since(t) >= duration);
                                if cooled_down {
                                    last_emit = Some(now);
                                    if tx.send(success).is_err() {
                                        break;
                                    }
                                }
                            }
                            Err(_) => break,
                        },
                    }
                }
            })
            .expect("spawn throttle worker");

        rx
    }

    fn name(&self) -> &str {
        self.name
    }
}
