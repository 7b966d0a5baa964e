//! Cgroup v1 (legacy, per-controller hierarchy) counter reads.
//!
//! Each controller is mounted as its own tree rooted at the cgroup root
//! (e.g. `/sys/fs/cgroup/cpuacct`, `/sys/fs/cgroup/memory`, ...), so a
//! single compute unit's accounting is spread across several parallel
//! directories that share the same relative path below the controller
//! name. [`sibling_controller_path`] re-bases a discovered cgroup's path
//! onto a different controller to read those.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::resolve_max_sentinel;
use crate::model::{BlkioCounters, CgMetric, CgroupRecord};
use crate::shell::Shell;
use crate::util;

pub fn read(cgroup: &CgroupRecord, active_controller: &str, shell: &Shell) -> CgMetric {
    let mut metric = CgMetric {
        uuid: cgroup.uuid.clone(),
        ..CgMetric::default()
    };
    let root = cgroup_root(cgroup);

    if let Err(e) = read_cpu(&root, &cgroup.relative_path, active_controller, &mut metric) {
        shell.debug(format!("cgroup {}: {e}", cgroup.uuid));
        metric.err = true;
    }
    if let Err(e) = read_memory(&root, &cgroup.relative_path, active_controller, &mut metric) {
        shell.debug(format!("cgroup {}: {e}", cgroup.uuid));
        metric.err = true;
    }
    if let Err(e) = read_blkio(&root, &cgroup.relative_path, active_controller, &mut metric) {
        shell.debug(format!("cgroup {}: {e}", cgroup.uuid));
    }
    if let Err(e) = read_rdma(&root, &cgroup.relative_path, active_controller, &mut metric) {
        shell.debug(format!("cgroup {}: {e}", cgroup.uuid));
    }
    if let Some(cpuset_dir) = sibling_controller_path(&cgroup.relative_path, active_controller, "cpuset") {
        if let Ok(contents) = fs::read_to_string(root.join(cpuset_dir).join("cpuset.cpus")) {
            if let Ok(len) = util::cpuset_len(&contents) {
                metric.cpus = len as f64;
            }
        }
    }

    metric
}

/// Recovers the cgroupfs mount root from a discovered record: discovery
/// always sets `absolute_path` to `root.join(relative_path)`, so popping
/// `relative_path`'s component count off the end of `absolute_path`
/// recovers `root` without threading it through every call site.
fn cgroup_root(cgroup: &CgroupRecord) -> PathBuf {
    let mut root = cgroup.absolute_path.clone();
    for _ in cgroup.relative_path.components() {
        root.pop();
    }
    root
}

/// `cpuacct.stat`'s `user`/`system` fields are reported in `USER_HZ`
/// clock ticks, not a fixed 100 Hz; read the real value via `sysconf`.
fn clock_ticks_per_second() -> f64 {
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 {
        ticks as f64
    } else {
        100.0
    }
}

fn sibling_controller_path(relative_path: &Path, active_controller: &str, target_controller: &str) -> Option<PathBuf> {
    let mut components = relative_path.components();
    let first = components.next()?;
    if first.as_os_str() != active_controller {
        return None;
    }
    Some(Path::new(target_controller).join(components.as_path()))
}

fn read_cpu(root: &Path, relative_path: &Path, active_controller: &str, metric: &mut CgMetric) -> Result<(), String> {
    let dir = root.join(relative_path);
    let usage_ns: f64 = fs::read_to_string(dir.join("cpuacct.usage"))
        .map_err(|e| e.to_string())?
        .trim()
        .parse()
        .map_err(|_| "malformed cpuacct.usage".to_owned())?;
    metric.cpu_total_seconds = usage_ns / 1_000_000_000.0;

    if let Ok(stat) = fs::read_to_string(dir.join("cpuacct.stat")) {
        let kv = parse_flat_kv(&stat);
        let ticks_to_seconds = 1.0 / clock_ticks_per_second();
        metric.cpu_user_seconds = kv.get("user").copied().unwrap_or(0.0) * ticks_to_seconds;
        metric.cpu_system_seconds = kv.get("system").copied().unwrap_or(0.0) * ticks_to_seconds;
    }

    let _ = active_controller;
    Ok(())
}

fn read_memory(root: &Path, relative_path: &Path, active_controller: &str, metric: &mut CgMetric) -> Result<(), String> {
    let Some(mem_dir) = sibling_controller_path(relative_path, active_controller, "memory") else {
        return Err("cgroup path did not start with active controller".to_owned());
    };
    let dir = root.join(mem_dir);

    let stat = fs::read_to_string(dir.join("memory.stat")).map_err(|e| e.to_string())?;
    let kv = parse_flat_kv(&stat);
    metric.memory_rss_bytes = kv.get("total_rss").copied().unwrap_or(0.0);
    metric.memory_cache_bytes = kv.get("total_cache").copied().unwrap_or(0.0);

    let usage = fs::read_to_string(dir.join("memory.usage_in_bytes")).map_err(|e| e.to_string())?;
    metric.memory_used_bytes = usage.trim().parse().unwrap_or(0.0);

    if let Ok(limit) = fs::read_to_string(dir.join("memory.limit_in_bytes")) {
        metric.memory_total_bytes = resolve_max_sentinel(&limit).unwrap_or(0.0);
    }
    if let Ok(failcnt) = fs::read_to_string(dir.join("memory.failcnt")) {
        metric.memory_fail_count = failcnt.trim().parse().unwrap_or(0.0);
    }

    if let Ok(usage) = fs::read_to_string(dir.join("memory.memsw.usage_in_bytes")) {
        metric.memsw_used_bytes = usage.trim().parse().unwrap_or(0.0);
    }
    if let Ok(limit) = fs::read_to_string(dir.join("memory.memsw.limit_in_bytes")) {
        metric.memsw_total_bytes = resolve_max_sentinel(&limit).unwrap_or(0.0);
    }
    if let Ok(failcnt) = fs::read_to_string(dir.join("memory.memsw.failcnt")) {
        metric.memsw_fail_count = failcnt.trim().parse().unwrap_or(0.0);
    }

    // PSI is not available on cgroup v1.
    Ok(())
}

fn read_blkio(root: &Path, relative_path: &Path, active_controller: &str, metric: &mut CgMetric) -> Result<(), String> {
    let Some(blkio_dir) = sibling_controller_path(relative_path, active_controller, "blkio") else {
        return Err("cgroup path did not start with active controller".to_owned());
    };
    let dir = root.join(blkio_dir);

    let read_bytes = parse_blkio_throttle(&dir.join("blkio.throttle.io_service_bytes"), "Read")?;
    let write_bytes = parse_blkio_throttle(&dir.join("blkio.throttle.io_service_bytes"), "Write")?;
    let read_reqs = parse_blkio_throttle(&dir.join("blkio.throttle.io_serviced"), "Read")?;
    let write_reqs = parse_blkio_throttle(&dir.join("blkio.throttle.io_serviced"), "Write")?;

    let mut devices: Vec<String> = read_bytes.keys().cloned().collect();
    devices.extend(write_bytes.keys().cloned());
    devices.sort();
    devices.dedup();

    for device in devices {
        metric.blkio.insert(
            device.clone(),
            BlkioCounters {
                read_bytes: read_bytes.get(&device).copied().unwrap_or(0.0),
                write_bytes: write_bytes.get(&device).copied().unwrap_or(0.0),
                read_reqs: read_reqs.get(&device).copied().unwrap_or(0.0),
                write_reqs: write_reqs.get(&device).copied().unwrap_or(0.0),
            },
        );
    }
    Ok(())
}

fn read_rdma(root: &Path, relative_path: &Path, active_controller: &str, metric: &mut CgMetric) -> Result<(), String> {
    let Some(rdma_dir) = sibling_controller_path(relative_path, active_controller, "rdma") else {
        return Err("cgroup path did not start with active controller".to_owned());
    };
    let dir = root.join(rdma_dir);
    let contents = fs::read_to_string(dir.join("rdma.current")).map_err(|e| e.to_string())?;
    for line in contents.lines() {
        let mut fields = line.split_whitespace();
        let Some(device) = fields.next() else { continue };
        for field in fields {
            if let Some((key, value)) = field.split_once('=') {
                let Ok(value): Result<f64, _> = value.parse() else { continue };
                if key == "hca_handle" {
                    metric.rdma_hca_handles.insert(device.to_owned(), value);
                } else if key == "hca_object" {
                    metric.rdma_hca_objects.insert(device.to_owned(), value);
                }
            }
        }
    }
    Ok(())
}

/// blkio throttle files are formatted `MAJ:MIN Direction value`, with a
/// trailing `Total ...` line to ignore.
fn parse_blkio_throttle(path: &Path, direction: &str) -> Result<HashMap<String, f64>, String> {
    let contents = fs::read_to_string(path).map_err(|e| e.to_string())?;
    let mut out = HashMap::new();
    for line in contents.lines() {
        let mut fields = line.split_whitespace();
        let (Some(device), Some(dir), Some(value)) = (fields.next(), fields.next(), fields.next()) else {
            continue;
        };
        if dir == direction {
            if let Ok(value) = value.parse::<f64>() {
                out.insert(device.to_owned(), value);
            }
        }
    }
    Ok(out)
}

fn parse_flat_kv(contents: &str) -> HashMap<String, f64> {
    contents
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let key = fields.next()?;
            let value: f64 = fields.next()?.parse().ok()?;
            Some((key.to_owned(), value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sibling_path_rebases_onto_other_controller() {
        let relative = Path::new("cpuacct/slurm/job_1009249");
        let sibling = sibling_controller_path(relative, "cpuacct", "memory").unwrap();
        assert_eq!(sibling, PathBuf::from("memory/slurm/job_1009249"));
    }

    #[test]
    fn sibling_path_none_when_prefix_mismatches() {
        let relative = Path::new("memory/slurm/job_1009249");
        assert!(sibling_controller_path(relative, "cpuacct", "blkio").is_none());
    }

    #[test]
    fn cgroup_root_recovers_configured_mount_point() {
        let record = CgroupRecord {
            uuid:          "1009249".to_owned(),
            relative_path: PathBuf::from("cpuacct/slurm/job_1009249"),
            absolute_path: PathBuf::from("/mnt/custom-cgroup/cpuacct/slurm/job_1009249"),
            inode:         0,
            processes:     Vec::new(),
        };
        assert_eq!(cgroup_root(&record), PathBuf::from("/mnt/custom-cgroup"));
    }
}
