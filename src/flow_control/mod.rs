//! Flow-control stages (C7): buffer, throttle, debounce.

mod buffer;
mod debounce;
mod throttle;

pub use buffer::{Buffer, BufferMode};
pub use debounce::Debounce;
pub use throttle::Throttle;
