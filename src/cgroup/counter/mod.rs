//! Cgroup Counter Reader: turns the raw accounting files of a single
//! cgroup directory into a uniform [`CgMetric`], via one of two
//! back-ends ([`v1`] or [`v2`]) chosen by the host's detected
//! [`CgroupMode`].

mod v1;
mod v2;

use crate::model::{CgMetric, CgroupMode, CgroupRecord};
use crate::shell::Shell;

/// Reads one cgroup's counters. Never returns `Err`: a failed read is
/// reported through [`CgMetric::err`] so the orchestrator can still emit
/// a `collect_error=1` sample for the unit, per the transient-read-failure
/// error category.
#[must_use]
pub fn read(cgroup: &CgroupRecord, mode: &CgroupMode, shell: &Shell) -> CgMetric {
    match mode {
        CgroupMode::Unified => v2::read(cgroup, shell),
        CgroupMode::Legacy(controller) => v1::read(cgroup, controller, shell),
    }
}

/// Reads every cgroup independently; callers may parallelize this
/// themselves (the function holds no state across calls), matching the
/// "no shared mutable state between reads" concurrency note.
#[must_use]
pub fn read_all(cgroups: &[CgroupRecord], mode: &CgroupMode, shell: &Shell) -> Vec<CgMetric> {
    cgroups.iter().map(|cgroup| read(cgroup, mode, shell)).collect()
}

/// Substitutes the kernel's `"max"` limit sentinel with the host's total
/// memory when known, per the v2 memory-limit (and, by the symmetric
/// policy decision recorded in DESIGN.md, swap-limit) substitution rule.
fn resolve_max_sentinel(raw: &str) -> Option<f64> {
    if raw.trim() == "max" {
        crate::util::total_memory_bytes().map(|b| b as f64)
    } else {
        raw.trim().parse::<f64>().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_passthrough_when_numeric() {
        assert_eq!(resolve_max_sentinel("1234"), Some(1234.0));
    }
}
