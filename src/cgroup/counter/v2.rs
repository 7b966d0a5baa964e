//! Cgroup v2 (unified hierarchy) counter reads.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use super::resolve_max_sentinel;
use crate::model::{BlkioCounters, CgMetric, CgroupRecord};
use crate::shell::Shell;
use crate::util;

pub fn read(cgroup: &CgroupRecord, shell: &Shell) -> CgMetric {
    let dir = &cgroup.absolute_path;
    let mut metric = CgMetric {
        uuid: cgroup.uuid.clone(),
        ..CgMetric::default()
    };

    if let Err(e) = read_cpu(dir, &mut metric) {
        shell.debug(format!("cgroup {}: {e}", cgroup.uuid));
        metric.err = true;
    }
    if let Err(e) = read_memory(dir, &mut metric) {
        shell.debug(format!("cgroup {}: {e}", cgroup.uuid));
        metric.err = true;
    }
    if let Err(e) = read_io(dir, &mut metric) {
        shell.debug(format!("cgroup {}: {e}", cgroup.uuid));
        metric.err = true;
    }
    if let Err(e) = read_rdma(dir, &mut metric) {
        shell.debug(format!("cgroup {}: {e}", cgroup.uuid));
        // RDMA support is host-dependent; a missing rdma.current is
        // absent data, not a transient failure, so it does not flip `err`.
    }
    if let Ok(contents) = fs::read_to_string(dir.join("cpuset.cpus.effective")) {
        if let Ok(len) = util::cpuset_len(&contents) {
            metric.cpus = len as f64;
        }
    }

    metric
}

fn read_cpu(dir: &Path, metric: &mut CgMetric) -> Result<(), String> {
    let contents = fs::read_to_string(dir.join("cpu.stat")).map_err(|e| e.to_string())?;
    let stats = parse_flat_kv(&contents);
    let usage_usec = stats.get("usage_usec").copied().unwrap_or(0.0);
    metric.cpu_total_seconds = usage_usec / 1_000_000.0;
    metric.cpu_user_seconds = stats.get("user_usec").copied().unwrap_or(0.0) / 1_000_000.0;
    metric.cpu_system_seconds = stats.get("system_usec").copied().unwrap_or(0.0) / 1_000_000.0;

    if let Ok(pressure) = fs::read_to_string(dir.join("cpu.pressure")) {
        metric.cpu_pressure_seconds = parse_psi_full_total_seconds(&pressure);
    }
    Ok(())
}

fn read_memory(dir: &Path, metric: &mut CgMetric) -> Result<(), String> {
    let stat = fs::read_to_string(dir.join("memory.stat")).map_err(|e| e.to_string())?;
    let stat_kv = parse_flat_kv(&stat);
    metric.memory_rss_bytes = stat_kv.get("anon").copied().unwrap_or(0.0);
    metric.memory_cache_bytes = stat_kv.get("file").copied().unwrap_or(0.0);

    let usage = fs::read_to_string(dir.join("memory.current")).map_err(|e| e.to_string())?;
    metric.memory_used_bytes = usage.trim().parse().unwrap_or(0.0);

    if let Ok(raw) = fs::read_to_string(dir.join("memory.max")) {
        metric.memory_total_bytes = resolve_max_sentinel(&raw).unwrap_or(0.0);
    }

    if let Ok(events) = fs::read_to_string(dir.join("memory.events")) {
        let kv = parse_flat_kv(&events);
        metric.memory_fail_count = kv.get("oom").copied().unwrap_or(0.0);
    }

    if let Ok(pressure) = fs::read_to_string(dir.join("memory.pressure")) {
        metric.memory_pressure_seconds = parse_psi_full_total_seconds(&pressure);
    }

    if let Ok(swap_current) = fs::read_to_string(dir.join("memory.swap.current")) {
        metric.memsw_used_bytes = swap_current.trim().parse().unwrap_or(0.0);
    }
    if let Ok(swap_max) = fs::read_to_string(dir.join("memory.swap.max")) {
        // Policy decision (recorded in DESIGN.md): the "max" substitution
        // applies symmetrically to the swap limit.
        metric.memsw_total_bytes = resolve_max_sentinel(&swap_max).unwrap_or(0.0);
    }
    if let Ok(events) = fs::read_to_string(dir.join("memory.swap.events")) {
        let kv = parse_flat_kv(&events);
        metric.memsw_fail_count = kv.get("fail").copied().unwrap_or(0.0);
    }

    Ok(())
}

fn read_io(dir: &Path, metric: &mut CgMetric) -> Result<(), String> {
    let contents = fs::read_to_string(dir.join("io.stat")).map_err(|e| e.to_string())?;
    for line in contents.lines() {
        let mut fields = line.split_whitespace();
        let Some(device) = fields.next() else { continue };
        let kv = parse_space_kv(fields);
        let counters = BlkioCounters {
            read_bytes: kv.get("rbytes").copied().unwrap_or(0.0),
            write_bytes: kv.get("wbytes").copied().unwrap_or(0.0),
            read_reqs: kv.get("rios").copied().unwrap_or(0.0),
            write_reqs: kv.get("wios").copied().unwrap_or(0.0),
        };
        metric.blkio.insert(device.to_owned(), counters);
    }

    if let Ok(pressure) = fs::read_to_string(dir.join("io.pressure")) {
        metric.blkio_pressure_seconds = parse_psi_full_total_seconds(&pressure);
    }
    Ok(())
}

fn read_rdma(dir: &Path, metric: &mut CgMetric) -> Result<(), String> {
    let contents = fs::read_to_string(dir.join("rdma.current")).map_err(|e| e.to_string())?;
    for line in contents.lines() {
        let mut fields = line.split_whitespace();
        let Some(device) = fields.next() else { continue };
        let kv = parse_space_kv(fields);
        metric
            .rdma_hca_handles
            .insert(device.to_owned(), kv.get("hca_handle").copied().unwrap_or(0.0));
        metric
            .rdma_hca_objects
            .insert(device.to_owned(), kv.get("hca_object").copied().unwrap_or(0.0));
    }
    Ok(())
}

/// Parses a `key value\n`-per-line file (`cpu.stat`, `memory.events`).
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

/// Parses `key=value` space-separated fields, as used by `io.stat` and
/// `rdma.current` after the leading device token.
fn parse_space_kv<'a>(fields: impl Iterator<Item = &'a str>) -> HashMap<String, f64> {
    fields
        .filter_map(|field| {
            let (key, value) = field.split_once('=')?;
            Some((key.to_owned(), value.parse::<f64>().ok()?))
        })
        .collect()
}

/// Parses the `full avg10=.. avg60=.. avg300=.. total=<usec>` line of a
/// PSI file into the `total` field, converted to seconds.
fn parse_psi_full_total_seconds(contents: &str) -> f64 {
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("full ") {
            for field in rest.split_whitespace() {
                if let Some(total) = field.strip_prefix("total=") {
                    if let Ok(usec) = total.parse::<f64>() {
                        return usec / 1_000_000.0;
                    }
                }
            }
        }
    }
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_psi_total_from_full_line() {
        let sample = "some avg10=0.00 avg60=0.00 avg300=0.00 total=0\nfull avg10=0.12 avg60=0.08 avg300=0.01 total=433924\n";
        assert_eq!(parse_psi_full_total_seconds(sample), 0.433924);
    }

    #[test]
    fn parses_io_stat_line() {
        let line = "253:0 rbytes=30206976 wbytes=1003376640 rios=1141 wios=14997 dbytes=0 dios=0";
        let mut fields = line.split_whitespace();
        fields.next();
        let kv = parse_space_kv(fields);
        assert_eq!(kv.get("rbytes"), Some(&30206976.0));
        assert_eq!(kv.get("wios"), Some(&14997.0));
    }
}
