//! Detects whether the host's cgroup hierarchy is the unified (v2) or
//! legacy (v1) API, and resolves the v1 controller index needed both to
//! pick which v1 subtree to walk and to populate the eBPF config map.

use std::path::Path;

use crate::cli::CgroupModeArg;
use crate::error::DiscoveryError;
use crate::model::CgroupMode;
use crate::util;

/// `CGROUP2_SUPER_MAGIC`, from `linux/magic.h`.
pub const CGROUP2_MAGIC: i64 = 0x6367_7270;
/// `CGROUP_SUPER_MAGIC`, from `linux/magic.h`.
pub const CGROUP_MAGIC: i64 = 0x2742_6673;

/// The controller walked on a v1 host when no more specific one applies:
/// `cpuacct` carries the process attachment list every manager's UUID
/// regex matches against, plus the CPU accounting most dashboards key on.
pub const DEFAULT_V1_CONTROLLER: &str = "cpuacct";

/// Determines cgroup mode by statting the configured root: a unified
/// mount reports `CGROUP2_SUPER_MAGIC` directly; a legacy host instead
/// mounts per-controller subtrees under the root, so a v1 controller
/// name must also be resolved.
pub fn detect(cgroup_root: &Path, forced: Option<CgroupModeArg>) -> Result<CgroupMode, DiscoveryError> {
    if let Some(forced) = forced {
        return Ok(match forced {
            CgroupModeArg::V1 => CgroupMode::Legacy(DEFAULT_V1_CONTROLLER.to_owned()),
            CgroupModeArg::V2 => CgroupMode::Unified,
        });
    }

    match util::filesystem_magic(cgroup_root) {
        Some(magic) if magic == CGROUP2_MAGIC => Ok(CgroupMode::Unified),
        Some(_) => Ok(CgroupMode::Legacy(DEFAULT_V1_CONTROLLER.to_owned())),
        None => Err(DiscoveryError::UnknownMode),
    }
}

/// Name of the file listing a cgroup's member pids, which differs between
/// the two APIs.
#[must_use]
pub fn procs_file_name(mode: &CgroupMode) -> &'static str {
    match mode {
        CgroupMode::Unified => "cgroup.procs",
        CgroupMode::Legacy(_) => "tasks",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forced_mode_bypasses_detection() {
        let mode = detect(Path::new("/nonexistent"), Some(CgroupModeArg::V2)).unwrap();
        assert_eq!(mode, CgroupMode::Unified);

        let mode = detect(Path::new("/nonexistent"), Some(CgroupModeArg::V1)).unwrap();
        assert_eq!(mode, CgroupMode::Legacy(DEFAULT_V1_CONTROLLER.to_owned()));
    }

    #[test]
    fn procs_file_differs_by_mode() {
        assert_eq!(procs_file_name(&CgroupMode::Unified), "cgroup.procs");
        assert_eq!(procs_file_name(&CgroupMode::Legacy("cpuacct".into())), "tasks");
    }
}
