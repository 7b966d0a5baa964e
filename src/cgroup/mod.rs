//! Cgroup Manager: turns a resource-manager name into a set of mount
//! points to walk, and walks them into [`CgroupRecord`]s.

pub mod counter;
pub mod manager;
pub mod version;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::model::{CgroupMode, CgroupRecord, Manager, ProcessDescriptor};
use crate::shell::Shell;
use crate::util;

/// Walks every mount point configured for `manager` and returns one
/// record per discovered compute unit. Never fails outright: per-unit
/// read failures are logged at debug and that unit is simply omitted,
/// per the "absent data" error category.
#[must_use]
pub fn discover(cgroup_root: &Path, manager: Manager, mode: &CgroupMode, shell: &Shell) -> Vec<CgroupRecord> {
    let mut records: HashMap<String, CgroupRecord> = HashMap::new();

    for pattern in manager::mount_point_globs(manager, mode) {
        for mount_dir in resolve_glob(cgroup_root, &pattern) {
            walk(&mount_dir, cgroup_root, manager, mode, None, &mut records, shell);
        }
    }

    records.into_values().collect()
}

#[allow(clippy::too_many_arguments)]
fn walk(
    dir: &Path,
    cgroup_root: &Path,
    manager: Manager,
    mode: &CgroupMode,
    ancestor_uuid: Option<&str>,
    records: &mut HashMap<String, CgroupRecord>,
    shell: &Shell,
) {
    let relative = util::relative_to(cgroup_root, dir).unwrap_or_else(|| dir.to_path_buf());
    let relative_str = relative.to_string_lossy().replace('\\', "/");

    if manager::is_child(manager, &relative_str) {
        if let Some(uuid) = ancestor_uuid {
            attach_processes(dir, mode, uuid, records, shell);
        }
        for child in util::subdirectories(dir) {
            walk(&child, cgroup_root, manager, mode, ancestor_uuid, records, shell);
        }
        return;
    }

    match manager::uuid_of(manager, &relative_str) {
        Some(uuid) if uuid.is_empty() => {
            shell.debug(format!("cgroup path {relative_str:?} matched but captured an empty uuid, skipping"));
        },
        Some(uuid) => {
            let Some(inode) = util::inode_of(dir) else {
                shell.debug(format!("failed to stat cgroup directory {dir:?}, skipping"));
                return;
            };
            records.entry(uuid.clone()).or_insert_with(|| CgroupRecord {
                uuid: uuid.clone(),
                relative_path: relative.clone(),
                absolute_path: dir.to_path_buf(),
                inode,
                processes: Vec::new(),
            });
            attach_processes(dir, mode, &uuid, records, shell);
            for child in util::subdirectories(dir) {
                walk(&child, cgroup_root, manager, mode, Some(&uuid), records, shell);
            }
        },
        None => {
            for child in util::subdirectories(dir) {
                walk(&child, cgroup_root, manager, mode, ancestor_uuid, records, shell);
            }
        },
    }
}

fn attach_processes(
    dir: &Path,
    mode: &CgroupMode,
    uuid: &str,
    records: &mut HashMap<String, CgroupRecord>,
    shell: &Shell,
) {
    let procs_path = dir.join(version::procs_file_name(mode));
    let Ok(contents) = std::fs::read_to_string(&procs_path) else {
        shell.debug(format!("failed to read {procs_path:?}"));
        return;
    };

    let Some(record) = records.get_mut(uuid) else {
        return;
    };
    for line in contents.lines() {
        let Ok(pid) = line.trim().parse::<u32>() else {
            continue;
        };
        if record.processes.iter().any(|p| p.pid == pid) {
            continue;
        }
        let cmdline = util::read_cmdline(pid).unwrap_or_default();
        record.processes.push(ProcessDescriptor { pid, cmdline });
    }
}

/// Expands a single-`*`-per-segment glob pattern against the filesystem,
/// relative to `root`. The manager mount-point patterns never need more
/// than this (a nodeset or per-controller directory name wildcard).
fn resolve_glob(root: &Path, pattern: &str) -> Vec<PathBuf> {
    let mut current = vec![root.to_path_buf()];
    for segment in pattern.split('/') {
        let mut next = Vec::new();
        if segment.contains('*') {
            for base in &current {
                for child in util::subdirectories(base) {
                    if let Some(name) = child.file_name().and_then(|n| n.to_str()) {
                        if wildcard_match(segment, name) {
                            next.push(child);
                        }
                    }
                }
            }
        } else {
            for base in &current {
                let candidate = base.join(segment);
                if candidate.is_dir() {
                    next.push(candidate);
                }
            }
        }
        current = next;
    }
    current
}

fn wildcard_match(pattern: &str, name: &str) -> bool {
    match pattern.split_once('*') {
        Some((prefix, suffix)) => {
            name.len() >= prefix.len() + suffix.len() && name.starts_with(prefix) && name.ends_with(suffix)
        },
        None => pattern == name,
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    fn write_procs(dir: &Path, pids: &[u32]) {
        fs::create_dir_all(dir).unwrap();
        let contents = pids.iter().map(u32::to_string).collect::<Vec<_>>().join("\n");
        fs::write(dir.join("cgroup.procs"), contents).unwrap();
    }

    #[test]
    fn discovers_three_slurm_v2_jobs_with_step_children() {
        let root = tempdir().unwrap();
        let base = root.path().join("system.slice/slurmstepd.scope");

        for (job, pids) in [(1009248, [101, 102]), (1009249, [201, 202]), (1009250, [301, 302])] {
            let job_dir = base.join(format!("job_{job}"));
            write_procs(&job_dir, &[]);
            let step_dir = job_dir.join("step_0");
            write_procs(&step_dir, &pids);
        }

        let mode = CgroupMode::Unified;
        let shell = Shell::from_write(Box::new(std::io::sink()), Box::new(std::io::sink()));
        let units = discover(root.path(), Manager::Slurm, &mode, &shell);

        assert_eq!(units.len(), 3);
        let uuids: Vec<&str> = {
            let mut v: Vec<&str> = units.iter().map(|u| u.uuid.as_str()).collect();
            v.sort_unstable();
            v
        };
        assert_eq!(uuids, vec!["1009248", "1009249", "1009250"]);

        let job249 = units.iter().find(|u| u.uuid == "1009249").unwrap();
        assert_eq!(job249.processes.len(), 2);
        assert!(job249.processes.iter().any(|p| p.pid == 201));
    }

    #[test]
    fn discovery_is_idempotent_on_unchanging_tree() {
        let root = tempdir().unwrap();
        let job_dir = root.path().join("system.slice/slurmstepd.scope/job_42");
        write_procs(&job_dir, &[11, 12]);

        let mode = CgroupMode::Unified;
        let shell = Shell::from_write(Box::new(std::io::sink()), Box::new(std::io::sink()));
        let first = discover(root.path(), Manager::Slurm, &mode, &shell);
        let second = discover(root.path(), Manager::Slurm, &mode, &shell);

        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].uuid, second[0].uuid);
    }
}
