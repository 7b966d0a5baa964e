//! Shared data model for the attribution engine: the entities that flow
//! from the Cgroup Manager through every sub-collector to the sink.

use std::collections::HashMap;
use std::path::PathBuf;

/// Which resource manager's convention a cgroup tree belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Manager {
    Slurm,
    Libvirt,
    K8s,
}

/// Which cgroup API a host is running: unified (v2) or legacy (v1), the
/// latter tagged with the name of the controller actually walked (since a
/// v1 host has one subtree per controller, not one unified tree).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CgroupMode {
    Unified,
    Legacy(String),
}

impl CgroupMode {
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Unified => "unified",
            Self::Legacy(controller) => controller,
        }
    }
}

/// A process attached to a compute unit's cgroup.
///
/// `environ` is intentionally not eagerly populated: reading another
/// user's `/proc/<pid>/environ` requires raised capabilities, so callers
/// fetch it lazily through [`crate::security::SecurityContext`] only when
/// a sub-collector (currently just the GPU resolver) actually needs it.
#[derive(Debug, Clone)]
pub struct ProcessDescriptor {
    pub pid: u32,
    pub cmdline: String,
}

impl ProcessDescriptor {
    #[must_use]
    pub fn environ(&self) -> Option<HashMap<String, String>> { crate::util::read_environ(self.pid) }
}

/// One cgroup directory discovered under a manager's mount point,
/// carrying the processes attached to it (including those attached
/// indirectly via a child/step cgroup).
#[derive(Debug, Clone)]
pub struct CgroupRecord {
    pub uuid: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub inode: u64,
    pub processes: Vec<ProcessDescriptor>,
}

/// A live compute unit: the join point every sub-collector attributes its
/// samples to.
#[derive(Debug, Clone)]
pub struct ComputeUnit {
    pub uuid: String,
    pub manager: Manager,
    pub mode: CgroupMode,
    pub cgroup: CgroupRecord,
}

impl ComputeUnit {
    #[must_use]
    pub fn pids(&self) -> Vec<u32> { self.cgroup.processes.iter().map(|p| p.pid).collect() }
}

/// A single device's blkio counters, keyed by device id (e.g. `"8:0"`) at
/// the call site.
#[derive(Debug, Clone, Default)]
pub struct BlkioCounters {
    pub read_bytes: f64,
    pub write_bytes: f64,
    pub read_reqs: f64,
    pub write_reqs: f64,
}

/// Per-unit snapshot produced by the Cgroup Counter Reader.
#[derive(Debug, Clone, Default)]
pub struct CgMetric {
    pub uuid: String,

    pub cpu_user_seconds: f64,
    pub cpu_system_seconds: f64,
    pub cpu_total_seconds: f64,
    pub cpu_pressure_seconds: f64,
    pub cpus: f64,

    pub memory_rss_bytes: f64,
    pub memory_cache_bytes: f64,
    pub memory_used_bytes: f64,
    pub memory_total_bytes: f64,
    pub memory_fail_count: f64,
    pub memory_pressure_seconds: f64,

    pub memsw_used_bytes: f64,
    pub memsw_total_bytes: f64,
    pub memsw_fail_count: f64,

    pub rdma_hca_handles: HashMap<String, f64>,
    pub rdma_hca_objects: HashMap<String, f64>,

    pub blkio: HashMap<String, BlkioCounters>,
    pub blkio_pressure_seconds: f64,

    /// Set when any source file for this unit failed to read; the rest of
    /// the struct is then a best-effort partial snapshot.
    pub err: bool,
}

impl CgMetric {
    #[must_use]
    pub fn errored(uuid: String) -> Self {
        Self {
            uuid,
            err: true,
            ..Self::default()
        }
    }
}

/// Hardware, software, or cache perf_event_open family, used both to pick
/// which counters to open and as a metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum PerfEvent {
    CpuCycles,
    Instructions,
    BranchInstructions,
    BranchMisses,
    CacheReferences,
    CacheMisses,
    RefCpuCycles,

    ContextSwitches,
    PageFaults,
    CpuMigrations,
    AlignmentFaults,

    L1dReadAccess,
    L1dReadMiss,
    L1dWriteAccess,
    L1dWriteMiss,
    L1iReadAccess,
    L1iReadMiss,
    LlReadAccess,
    LlReadMiss,
    LlWriteAccess,
    LlWriteMiss,
    DtlbReadAccess,
    DtlbReadMiss,
    ItlbReadAccess,
    ItlbReadMiss,
    BranchReadAccess,
    BranchReadMiss,
}

/// Raw values returned by a single `read(2)` on a grouped perf-event fd.
#[derive(Debug, Clone, Copy, Default)]
pub struct PerfReading {
    pub value: u64,
    pub time_enabled: u64,
    pub time_running: u64,
}

impl PerfReading {
    /// Applies the multiplexing-scaling formula. Returns `None` when the
    /// event was never scheduled during this interval, in which case the
    /// caller should keep the previously scaled value rather than treat
    /// this as zero.
    #[must_use]
    pub fn scaled(&self) -> Option<f64> {
        if self.time_running == 0 {
            return None;
        }
        Some(self.value as f64 * self.time_enabled as f64 / self.time_running as f64)
    }
}

/// A GPU device as enumerated by the vendor SMI library, including its
/// MIG instance breakdown if MIG is enabled.
#[derive(Debug, Clone)]
pub struct GpuDevice {
    pub global_index: u32,
    pub uuid: String,
    pub mig_enabled: bool,
    pub mig_instances: Vec<MigInstance>,
}

#[derive(Debug, Clone)]
pub struct MigInstance {
    pub global_index: u32,
    pub gpu_inst_id: u32,
    pub sm_fraction: f64,
}

/// A GPU index resolved to a unit, carrying whichever label is
/// appropriate (`index` alone for a full device, `index` + `hindex` +
/// fractional value for a MIG slice).
#[derive(Debug, Clone)]
pub struct GpuOrdinal {
    pub global_index: u32,
    pub gpu_uuid: String,
    pub hindex: String,
    pub value: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perf_reading_scales_by_enabled_over_running() {
        let r = PerfReading {
            value: 1000,
            time_enabled: 200,
            time_running: 100,
        };
        assert_eq!(r.scaled(), Some(2000.0));
    }

    #[test]
    fn perf_reading_with_zero_running_is_none() {
        let r = PerfReading {
            value: 1000,
            time_enabled: 200,
            time_running: 0,
        };
        assert_eq!(r.scaled(), None);
    }

    #[test]
    fn cgroup_mode_label_for_legacy_is_controller_name() {
        assert_eq!(CgroupMode::Legacy("cpuacct".into()).label(), "cpuacct");
        assert_eq!(CgroupMode::Unified.label(), "unified");
    }
}
