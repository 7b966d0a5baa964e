//! Security context: a named bundle of capabilities raised for the
//! duration of a single callback and lowered again afterward.
//!
//! Two call sites need this: reading an arbitrary process's
//! `/proc/<pid>/environ` (`CAP_SYS_PTRACE` + `CAP_DAC_READ_SEARCH`, used
//! by the Perf Profiler's environment-variable filter and the GPU
//! Ordinal Resolver's environment strategy) and toggling per-PID RDMA QP
//! counters by executing the RDMA control tool as root (`CAP_SETUID` +
//! `CAP_SETGID`).
//!
//! The callback must not spawn threads: a new thread does not inherit
//! the calling thread's raised effective capability set, so any fan-out
//! attempted inside `run` would silently run unprivileged. Callers that
//! need to sweep many pids must therefore loop sequentially inside the
//! callback rather than parallelising across it.

use caps::{CapSet, Capability};

use crate::error::SecurityError;

/// A named, capability-scoped callback context.
pub struct SecurityContext {
    name: &'static str,
    capabilities: Vec<Capability>,
}

impl SecurityContext {
    #[must_use]
    pub fn new(name: &'static str, capabilities: Vec<Capability>) -> Self { Self { name, capabilities } }

    /// Raises this context's capabilities on the *effective* set of the
    /// calling thread, invokes `f`, then lowers them again regardless of
    /// whether `f` panics.
    pub fn run<F, R>(&self, f: F) -> Result<R, SecurityError>
    where
        F: FnOnce() -> R,
    {
        for cap in &self.capabilities {
            caps::raise(None, CapSet::Effective, *cap).map_err(|e| SecurityError::Raise(*cap, e.to_string()))?;
        }

        let _guard = LoweringGuard {
            capabilities: &self.capabilities,
            name: self.name,
        };
        Ok(f())
    }
}

/// Lowers the context's capabilities when dropped, so a panic inside the
/// callback still releases them instead of leaving the thread
/// permanently privileged.
struct LoweringGuard<'a> {
    capabilities: &'a [Capability],
    name: &'static str,
}

impl Drop for LoweringGuard<'_> {
    fn drop(&mut self) {
        for cap in self.capabilities {
            if let Err(e) = caps::lower(None, CapSet::Effective, *cap) {
                // Nothing further we can safely do: the thread is about to
                // either return a privileged result or unwind. Logging
                // through a shared Shell would require threading one in
                // here just for this rare failure path.
                eprintln!("security context {}: failed to lower {cap:?}: {e}", self.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_capability_set_runs_callback() {
        let ctx = SecurityContext::new("test", vec![]);
        let result = ctx.run(|| 2 + 2);
        assert_eq!(result.unwrap(), 4);
    }
}
