//! InfiniBand sysfs port counters, exposed unconditionally regardless of
//! whether the host's RDMA control tool supports per-PID QP mode.

use std::fs;
use std::path::{Path, PathBuf};

const CLASS_ROOT: &str = "/sys/class/infiniband";

const COUNTER_FILES: &[&str] = &[
    "port_xmit_data",
    "port_rcv_data",
    "port_xmit_packets",
    "port_rcv_packets",
    "port_xmit_discards",
    "port_rcv_errors",
    "port_xmit_constraint_errors",
    "port_rcv_constraint_errors",
];

/// One InfiniBand port's sysfs counters, at a single point in time.
#[derive(Debug, Clone, Default)]
pub struct PortCounters {
    pub device: String,
    pub port: String,
    pub state: Option<u32>,
    pub counters: Vec<(&'static str, u64)>,
}

/// Enumerates every `{device}/ports/{port}` pair under
/// `/sys/class/infiniband` and reads its counters and link state.
#[must_use]
pub fn read_all() -> Vec<PortCounters> { read_all_under(Path::new(CLASS_ROOT)) }

fn read_all_under(root: &Path) -> Vec<PortCounters> {
    let mut out = Vec::new();
    let Ok(devices) = fs::read_dir(root) else { return out };

    for device_entry in devices.flatten() {
        let device = device_entry.file_name().to_string_lossy().into_owned();
        let ports_dir = device_entry.path().join("ports");
        let Ok(ports) = fs::read_dir(&ports_dir) else { continue };

        for port_entry in ports.flatten() {
            let port = port_entry.file_name().to_string_lossy().into_owned();
            out.push(read_port(&device, &port, &port_entry.path()));
        }
    }
    out
}

fn read_port(device: &str, port: &str, port_dir: &Path) -> PortCounters {
    let mut counters = Vec::with_capacity(COUNTER_FILES.len());
    let counters_dir = port_dir.join("counters");
    for name in COUNTER_FILES {
        if let Some(value) = read_u64(&counters_dir.join(name)) {
            counters.push((*name, value));
        }
    }
    let state = read_state(&port_dir.join("state"));

    PortCounters { device: device.to_owned(), port: port.to_owned(), state, counters }
}

fn read_u64(path: &Path) -> Option<u64> { fs::read_to_string(path).ok()?.trim().parse().ok() }

/// `state` sysfs files read like `4: ACTIVE`; only the numeric id is kept.
fn read_state(path: &PathBuf) -> Option<u32> {
    let raw = fs::read_to_string(path).ok()?;
    let digits = raw.trim().split(':').next()?;
    digits.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_device_and_port_counters_from_a_synthetic_tree() {
        let dir = tempfile::tempdir().unwrap();
        let port_dir = dir.path().join("mlx5_0/ports/1");
        let counters_dir = port_dir.join("counters");
        fs::create_dir_all(&counters_dir).unwrap();
        fs::write(counters_dir.join("port_xmit_data"), "1024\n").unwrap();
        fs::write(counters_dir.join("port_rcv_data"), "2048\n").unwrap();
        fs::write(port_dir.join("state"), "4: ACTIVE\n").unwrap();

        let found = read_all_under(dir.path());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].device, "mlx5_0");
        assert_eq!(found[0].port, "1");
        assert_eq!(found[0].state, Some(4));
        assert!(found[0].counters.contains(&("port_xmit_data", 1024)));
        assert!(found[0].counters.contains(&("port_rcv_data", 2048)));
    }

    #[test]
    fn missing_root_yields_no_ports() {
        assert!(read_all_under(Path::new("/nonexistent/ib/root")).is_empty());
    }
}
