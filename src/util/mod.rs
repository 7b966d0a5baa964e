// Items in the util crate are imported at the root level, so repetition of
// the module names isn't seen by users outside the crate (and is important
// for context)
#![allow(clippy::module_name_repetitions)]

//! Utility methods shared across the attribution engine: timestamps,
//! `/proc` access, cpuset range parsing and filesystem helpers. Every
//! facility here assumes Linux, since the engine's data sources (cgroupfs,
//! procfs, perf_event_open, eBPF) only exist there.

pub(self) mod cpuset;
pub(self) mod fsutil;
pub(self) mod meminfo;
pub(self) mod proc;
pub(self) mod time;

pub use cpuset::*;
pub use fsutil::*;
pub use meminfo::*;
pub use proc::*;
pub use time::*;
