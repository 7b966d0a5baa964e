//! Parses the output of the host's RDMA control tool (`rdma`, from
//! `iproute2`/`rdma-core`) and drives its per-PID QP counter toggle.
//!
//! The tool's human output is whitespace/`key value` pairs per line, one
//! resource per line, e.g.:
//!
//! ```text
//! link mlx5_0/1 state ACTIVE physical_state LINK_UP
//! dev mlx5_0 mrs 12 pid 4821 comm job
//! ```
//!
//! Parsing here is deliberately line-oriented rather than using the
//! tool's `-j` JSON mode: older `rdma-core` releases common on HPC
//! clusters predate JSON support.

use std::collections::HashMap;
use std::process::Command;

use crate::error::RdmaError;

/// One `resource show mr` or `resource show cq` line, keyed by pid.
#[derive(Debug, Clone, Default)]
pub struct ResourceEntry {
    pub device: String,
    pub pid: u32,
    pub num: u64,
}

/// One `resource show qp` line, joined with `statistic qp show` hardware
/// counters for the same `{device, port, pid}`.
#[derive(Debug, Clone, Default)]
pub struct QpEntry {
    pub device: String,
    pub port: String,
    pub pid: u32,
    pub hw_counters: HashMap<String, u64>,
}

const QP_HW_COUNTER_NAMES: &[&str] = &[
    "rx_write_requests",
    "rx_read_requests",
    "rx_atomic_requests",
    "req_cqe_error",
    "req_cqe_flush_error",
    "req_remote_access_errors",
    "req_remote_invalid_request",
    "resp_cqe_error",
    "resp_cqe_flush_error",
    "resp_local_length_error",
    "resp_remote_access_errors",
];

/// Name of the executable invoked for every RDMA tool operation, normally
/// `"rdma"`; configurable so tests can point at a stub script.
pub struct Tool {
    binary: String,
}

impl Tool {
    #[must_use]
    pub fn new(binary: impl Into<String>) -> Self { Self { binary: binary.into() } }

    fn run(&self, args: &[&str]) -> Result<String, RdmaError> {
        let output = Command::new(&self.binary).args(args).output().map_err(|e| RdmaError::Exec(e.to_string()))?;
        if !output.status.success() {
            return Err(RdmaError::Exec(format!("{} {:?} exited with {}", self.binary, args, output.status)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// `resource show mr`, aggregated later per-uuid by the caller via the
    /// pid→uuid map.
    pub fn resource_mr(&self) -> Result<Vec<ResourceEntry>, RdmaError> {
        let raw = self.run(&["resource", "show", "mr"])?;
        Ok(parse_resource_lines(&raw, "mrn"))
    }

    pub fn resource_cq(&self) -> Result<Vec<ResourceEntry>, RdmaError> {
        let raw = self.run(&["resource", "show", "cq"])?;
        Ok(parse_resource_lines(&raw, "cqn"))
    }

    /// `resource show qp` joined with `statistic qp show`'s hardware
    /// counters, matched on `{device, port, pid}`.
    pub fn resource_qp(&self) -> Result<Vec<QpEntry>, RdmaError> {
        let resources = self.run(&["resource", "show", "qp"])?;
        let statistics = self.run(&["statistic", "qp", "show"])?;
        Ok(join_qp(&resources, &statistics))
    }

    /// Current per-PID QP counter mode for every link, `{link: enabled}`.
    pub fn statistic_mode(&self) -> Result<HashMap<String, bool>, RdmaError> {
        let raw = self.run(&["statistic", "qp", "mode"])?;
        Ok(parse_mode_lines(&raw))
    }

    /// Toggles per-PID QP counter mode for a single link. `enable = false`
    /// restores the default mode at shutdown.
    pub fn set_mode(&self, link: &str, enable: bool) -> Result<(), RdmaError> {
        let mode = if enable { "auto" } else { "none" };
        self.run(&["statistic", "qp", "set", "mode", mode, "link", link])
            .map(|_| ())
            .map_err(|e| RdmaError::ToggleFailed(link.to_owned(), e.to_string()))
    }
}

fn field(line: &str, key: &str) -> Option<String> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    tokens.iter().position(|t| *t == key).and_then(|i| tokens.get(i + 1)).map(|s| (*s).to_owned())
}

fn parse_resource_lines(raw: &str, num_key: &str) -> Vec<ResourceEntry> {
    raw.lines()
        .filter_map(|line| {
            let device = field(line, "dev")?;
            let pid: u32 = field(line, "pid")?.parse().ok()?;
            let num: u64 = field(line, num_key)?.parse().ok()?;
            Some(ResourceEntry { device, pid, num })
        })
        .collect()
}

fn join_qp(resources: &str, statistics: &str) -> Vec<QpEntry> {
    let mut entries: Vec<QpEntry> = resources
        .lines()
        .filter_map(|line| {
            let device = field(line, "dev")?;
            let port = field(line, "port").unwrap_or_else(|| "1".to_owned());
            let pid: u32 = field(line, "pid")?.parse().ok()?;
            Some(QpEntry { device, port, pid, hw_counters: HashMap::new() })
        })
        .collect();

    for line in statistics.lines() {
        let Some(device) = field(line, "link").and_then(|l| l.split('/').next().map(str::to_owned)) else { continue };
        let port = field(line, "link").and_then(|l| l.split('/').nth(1).map(str::to_owned)).unwrap_or_else(|| "1".to_owned());
        let Some(pid) = field(line, "pid").and_then(|p| p.parse::<u32>().ok()) else { continue };

        let Some(entry) = entries.iter_mut().find(|e| e.device == device && e.port == port && e.pid == pid) else { continue };
        for name in QP_HW_COUNTER_NAMES {
            if let Some(value) = field(line, name).and_then(|v| v.parse().ok()) {
                entry.hw_counters.insert((*name).to_owned(), value);
            }
        }
    }
    entries
}

fn parse_mode_lines(raw: &str) -> HashMap<String, bool> {
    raw.lines()
        .filter_map(|line| {
            let link = field(line, "link")?;
            let mode = field(line, "mode")?;
            Some((link, mode != "none"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mr_resource_lines() {
        let raw = "dev mlx5_0 mrn 12 pid 4821 comm job\ndev mlx5_1 mrn 3 pid 99 comm other\n";
        let entries = parse_resource_lines(raw, "mrn");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].device, "mlx5_0");
        assert_eq!(entries[0].pid, 4821);
        assert_eq!(entries[0].num, 12);
    }

    #[test]
    fn joins_qp_resource_and_statistic_lines_on_device_port_pid() {
        let resources = "dev mlx5_0 port 1 pid 4821 comm job\n";
        let statistics = "link mlx5_0/1 pid 4821 rx_write_requests 7 req_cqe_error 0\n";
        let entries = join_qp(resources, statistics);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].hw_counters.get("rx_write_requests"), Some(&7));
        assert_eq!(entries[0].hw_counters.get("req_cqe_error"), Some(&0));
    }

    #[test]
    fn parses_statistic_mode_as_boolean_per_link() {
        let raw = "link mlx5_0/1 mode auto\nlink mlx5_1/1 mode none\n";
        let modes = parse_mode_lines(raw);
        assert_eq!(modes.get("mlx5_0/1"), Some(&true));
        assert_eq!(modes.get("mlx5_1/1"), Some(&false));
    }
}
