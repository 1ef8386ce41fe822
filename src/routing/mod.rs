//! Routing stages (C6, C11): fan-in (N→1), fan-out (1→N), 1→K content-based
//! routing (split/switch/partition), and the dead-letter split (1→2
//! success/failure bifurcation).
//!
//! These do not fit the single-input/single-output [`crate::stage::Stage`]
//! contract shape, so each exposes its own `process`-like entry point with
//! the arity the spec actually calls for, while keeping the same worker
//! discipline: one thread per concurrent concern, every suspension point
//! selecting on the cancellation gate.

mod dead_letter;
mod fan_in;
mod fan_out;
mod partition;
mod split;
mod switch;

pub use dead_letter::{DeadLetterOutputs, DeadLetterSplit, DEFAULT_STALL_TIMEOUT};
pub use fan_in::FanIn;
pub use fan_out::FanOut;
pub use partition::{Partition, PartitionOutputs};
pub use split::{Split, SplitCounters, SplitOutputs};
pub use switch::{RouteStream, Switch, SwitchOutputs};
