//! Concurrent transforms (C5): a fixed-size worker pool applying a mapping
//! function to multiple items in flight at once, either preserving input
//! order in the output or emitting as soon as each result is ready.

mod parallel_map;

pub use parallel_map::{Order, ParallelMap};
