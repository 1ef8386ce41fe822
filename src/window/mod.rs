//! Windowing stages (C9): tumbling, sliding, session.
//!
//! All three emit `Result<Vec<Result<T>>>` — a single success whose payload
//! is the window's contained items, which individually keep their
//! success/failure tag, per the data model's `Window<T>` definition ("carries
//! the window's contained `Result<T>` sequence, both successes and failures
//! that fell within the window"). This is deliberately unlike
//! [`crate::batch::Batch`], which only ever batches successes and emits
//! input failures immediately and separately — windows have no such
//! exception and fold failures into the window they temporally belong to.

mod session;
mod sliding;
mod tumbling;

pub use session::Session;
pub use sliding::Sliding;
pub use tumbling::Tumbling;

use crate::clock::Timestamp;
use crate::metadata::{keys, Metadata, Value};
use std::time::Duration;

pub(crate) fn window_metadata(start: Timestamp, end: Timestamp, size: Duration, kind: &'static str) -> Metadata {
    Metadata::none()
        .with(keys::WINDOW_START, Value::Timestamp(start.as_nanos()))
        .with(keys::WINDOW_END, Value::Timestamp(end.as_nanos()))
        .with(keys::WINDOW_TYPE, kind)
        .with(keys::WINDOW_SIZE, size)
}
