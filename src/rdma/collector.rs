//! RDMA Collector: always emits InfiniBand sysfs port counters; where the
//! host's RDMA tool supports per-PID QP counters, enables that mode at
//! startup and attributes MR/CQ/QP resources to compute units via the
//! process→uuid map.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use caps::Capability;

use crate::rdma::sysfs;
use crate::rdma::tool::Tool;
use crate::security::SecurityContext;
use crate::shell::Shell;
use crate::sink::{Sample, Sink};

pub struct RdmaCollector {
    tool: Tool,
    security: SecurityContext,
    enabled_by_us: Mutex<HashSet<String>>,
}

impl RdmaCollector {
    #[must_use]
    pub fn new(tool_binary: impl Into<String>) -> Self {
        Self {
            tool: Tool::new(tool_binary),
            security: SecurityContext::new("rdma-qp-toggle", vec![Capability::CAP_SETUID, Capability::CAP_SETGID]),
            enabled_by_us: Mutex::new(HashSet::new()),
        }
    }

    /// Enables per-PID QP counters for every link not already in that
    /// mode. Tool-level failures (tool missing, unsupported device) are
    /// logged and otherwise non-fatal: sysfs counters keep working either
    /// way.
    pub fn start(&self, shell: &Shell) {
        let modes = match self.tool.statistic_mode() {
            Ok(modes) => modes,
            Err(err) => {
                shell.warn(format!("rdma: could not read per-PID QP counter mode, per-unit QP attribution disabled: {err}"));
                return;
            },
        };

        for (link, enabled) in modes {
            if enabled {
                continue;
            }
            let result = self.security.run(|| self.tool.set_mode(&link, true));
            match result {
                Ok(Ok(())) => {
                    self.enabled_by_us.lock().unwrap().insert(link);
                },
                Ok(Err(err)) => shell.warn(format!("rdma: {err}")),
                Err(err) => shell.warn(format!("rdma: could not raise capabilities to toggle QP mode: {err}")),
            }
        }
    }

    /// Reads sysfs port counters (always) and MR/CQ/QP resources (when
    /// the tool is usable), emitting samples for each.
    pub fn scrape(&self, pid_to_uuid: &HashMap<u32, String>, sink: &impl Sink, shell: &Shell) {
        for port in sysfs::read_all() {
            for (name, value) in &port.counters {
                sink.emit(
                    Sample::counter(*name, *value as f64)
                        .with_label("device", port.device.clone())
                        .with_label("port", port.port.clone()),
                );
            }
        }

        if let Ok(entries) = self.tool.resource_mr() {
            emit_resource(entries, pid_to_uuid, "rdma_mr_count", sink);
        }
        if let Ok(entries) = self.tool.resource_cq() {
            emit_resource(entries, pid_to_uuid, "rdma_cq_count", sink);
        }

        match self.tool.resource_qp() {
            Ok(entries) => {
                for entry in entries {
                    let Some(uuid) = pid_to_uuid.get(&entry.pid) else { continue };
                    for (counter, value) in &entry.hw_counters {
                        sink.emit(
                            Sample::counter(leak(counter), *value as f64)
                                .with_label("uuid", uuid.clone())
                                .with_label("device", entry.device.clone())
                                .with_label("port", entry.port.clone()),
                        );
                    }
                }
            },
            Err(err) => shell.debug(format!("rdma: qp resource read unavailable this scrape: {err}")),
        }
    }

    /// Disables per-PID QP mode on every link this collector enabled.
    pub fn stop(&self, shell: &Shell) {
        let links: Vec<String> = self.enabled_by_us.lock().unwrap().drain().collect();
        for link in links {
            let result = self.security.run(|| self.tool.set_mode(&link, false));
            if let Err(err) = result.and_then(|inner| inner.map_err(|e| crate::error::SecurityError::Lower(Capability::CAP_SETUID, e.to_string()))) {
                shell.warn(format!("rdma: failed to restore QP counter mode on {link}: {err}"));
            }
        }
    }
}

fn emit_resource(entries: Vec<crate::rdma::tool::ResourceEntry>, pid_to_uuid: &HashMap<u32, String>, metric: &'static str, sink: &impl Sink) {
    let mut by_uuid_device: HashMap<(String, String), u64> = HashMap::new();
    for entry in entries {
        let Some(uuid) = pid_to_uuid.get(&entry.pid) else { continue };
        *by_uuid_device.entry((uuid.clone(), entry.device.clone())).or_insert(0) += entry.num;
    }
    for ((uuid, device), num) in by_uuid_device {
        sink.emit(Sample::gauge(metric, num as f64).with_label("uuid", uuid).with_label("device", device));
    }
}

/// Counter names are short and drawn from a fixed, known set; leaking
/// them once per process keeps `Sample::name` a plain `&'static str`
/// without growing an interning table for a handful of values.
fn leak(name: &str) -> &'static str { Box::leak(name.to_owned().into_boxed_str()) }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_resource_aggregates_by_uuid_and_device() {
        use crate::rdma::tool::ResourceEntry;
        use crate::sink::ChannelSink;

        let (sink, rx) = ChannelSink::new();
        let mut pid_to_uuid = HashMap::new();
        pid_to_uuid.insert(100, "job-1".to_owned());
        pid_to_uuid.insert(101, "job-1".to_owned());

        let entries = vec![
            ResourceEntry { device: "mlx5_0".into(), pid: 100, num: 4 },
            ResourceEntry { device: "mlx5_0".into(), pid: 101, num: 6 },
        ];
        emit_resource(entries, &pid_to_uuid, "rdma_mr_count", &sink);
        drop(sink);

        let samples: Vec<_> = rx.iter().collect();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].value, 10.0);
    }
}
