//! Per-manager mount-point layout, uuid extraction, and the
//! child-cgroup / ignored-helper-process predicates that together let
//! [`discover`](super::discover) walk any of the three recognised
//! resource managers with the same algorithm.

use lazy_static::lazy_static;
use regex::Regex;

use crate::model::{CgroupMode, Manager};

lazy_static! {
    static ref SLURM_UUID: Regex = Regex::new(r"job_(\d+)").unwrap();
    static ref SLURM_CHILD: Regex = Regex::new(r"/step_").unwrap();
    static ref SLURM_IGNORED_PROC: Regex =
        Regex::new(r"^(slurmstepd:.*|sleep \d+|/bin/bash .*/slurm_script)$").unwrap();

    static ref LIBVIRT_UUID: Regex = Regex::new(r"instance-\d+").unwrap();
    static ref LIBVIRT_CHILD: Regex = Regex::new(r"/libvirt").unwrap();

    static ref K8S_UUID: Regex =
        Regex::new(r"pod([0-9a-fA-F]{8}(?:_|-)[0-9a-fA-F]{4}(?:_|-)[0-9a-fA-F]{4}(?:_|-)[0-9a-fA-F]{4}(?:_|-)[0-9a-fA-F]{12})")
            .unwrap();
    static ref K8S_CHILD: Regex = Regex::new(r"/[0-9a-f]{64}$").unwrap();
}

/// Mount points a manager's cgroups live under, relative to the cgroup
/// root, for the given cgroup mode. Nodeset-suffixed slurm scopes
/// (`node{N}_slurmstepd.scope`) are discovered by the caller globbing the
/// parent directory, since the nodeset count isn't known statically.
#[must_use]
pub fn mount_point_globs(manager: Manager, mode: &CgroupMode) -> Vec<String> {
    match (manager, mode) {
        (Manager::Slurm, CgroupMode::Unified) => vec![
            "system.slice/slurmstepd.scope".to_owned(),
            "system.slice/node*_slurmstepd.scope".to_owned(),
        ],
        (Manager::Slurm, CgroupMode::Legacy(controller)) => {
            vec![format!("{controller}/slurm"), format!("{controller}/slurm_host*")]
        },
        (Manager::Libvirt, CgroupMode::Unified) => vec!["machine.slice".to_owned()],
        (Manager::Libvirt, CgroupMode::Legacy(controller)) => vec![format!("{controller}/machine.slice")],
        (Manager::K8s, CgroupMode::Unified) => vec!["kubepods".to_owned()],
        (Manager::K8s, CgroupMode::Legacy(controller)) => vec![format!("{controller}/kubepods")],
    }
}

/// Extracts the unit uuid from a cgroup path component, if this path is
/// the root of a unit's cgroup tree (as opposed to an intermediate or
/// child directory).
#[must_use]
pub fn uuid_of(manager: Manager, path_str: &str) -> Option<String> {
    let regex = match manager {
        Manager::Slurm => &*SLURM_UUID,
        Manager::Libvirt => &*LIBVIRT_UUID,
        Manager::K8s => &*K8S_UUID,
    };
    let captures = regex.captures(path_str)?;
    match manager {
        Manager::Slurm => captures.get(1).map(|m| m.as_str().to_owned()),
        Manager::Libvirt => captures.get(0).map(|m| m.as_str().to_owned()),
        Manager::K8s => captures.get(1).map(|m| m.as_str().replace('_', "-")),
    }
}

/// Whether `path_str` names a child/step/sub-scope cgroup: walked for its
/// processes, but never promoted to its own compute unit record.
#[must_use]
pub fn is_child(manager: Manager, path_str: &str) -> bool {
    match manager {
        Manager::Slurm => SLURM_CHILD.is_match(path_str),
        Manager::Libvirt => LIBVIRT_CHILD.is_match(path_str),
        Manager::K8s => K8S_CHILD.is_match(path_str),
    }
}

/// Whether `cmdline` names a manager helper process that should not be
/// profiled individually (it still counts toward cgroup-level counters,
/// since those are not process-filtered).
#[must_use]
pub fn is_ignored_proc(manager: Manager, cmdline: &str) -> bool {
    match manager {
        Manager::Slurm => SLURM_IGNORED_PROC.is_match(cmdline),
        Manager::Libvirt | Manager::K8s => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slurm_uuid_extraction() {
        assert_eq!(
            uuid_of(Manager::Slurm, "system.slice/slurmstepd.scope/job_1009249"),
            Some("1009249".to_owned())
        );
        assert_eq!(uuid_of(Manager::Slurm, "system.slice/slurmstepd.scope"), None);
    }

    #[test]
    fn slurm_child_cgroups_are_not_units() {
        assert!(is_child(Manager::Slurm, "job_1009249/step_0"));
        assert!(!is_child(Manager::Slurm, "job_1009249"));
    }

    #[test]
    fn slurm_ignored_helper_processes() {
        assert!(is_ignored_proc(Manager::Slurm, "slurmstepd: [1009249]"));
        assert!(is_ignored_proc(Manager::Slurm, "sleep 100"));
        assert!(is_ignored_proc(Manager::Slurm, "/bin/bash /var/spool/slurmd/job1009249/slurm_script"));
        assert!(!is_ignored_proc(Manager::Slurm, "/usr/bin/my_app --flag"));
    }

    #[test]
    fn libvirt_uuid_extraction() {
        let path = r"machine.slice/machine-qemu\x2d1\x2dinstance\x2d00000002.scope";
        assert_eq!(uuid_of(Manager::Libvirt, path), Some("instance-00000002".to_owned()));
    }

    #[test]
    fn k8s_uuid_extraction() {
        let path = "kubepods/burstable/pod6d06282c_0377_4527_9a0f_9968bc9c4102";
        assert_eq!(
            uuid_of(Manager::K8s, path),
            Some("6d06282c-0377-4527-9a0f-9968bc9c4102".to_owned())
        );
    }
}
