//! Perf Profiler: per-process hardware/software/cache perf_event_open
//! counters, scaled for multiplexing and aggregated to the compute unit.

pub mod events;
pub mod profiler;
pub mod sys;

pub use profiler::{Profiler, ProfiledProcess};
