//! eBPF-backed VFS and network I/O attribution.

pub mod collector;
pub mod objects;

pub use collector::EbpfCollector;
