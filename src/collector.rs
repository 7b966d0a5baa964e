//! Compute-Unit Collector: the per-manager orchestrator. Runs one
//! discovery pass, fans out to every enabled sub-collector, and emits
//! the resulting samples to the sink.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cgroup;
use crate::cgroup::counter;
use crate::cli::Config;
use crate::ebpf::EbpfCollector;
use crate::error::DiscoveryError;
use crate::gpu::nvml::ReindexTable;
use crate::gpu::GpuResolver;
use crate::model::{CgMetric, CgroupMode, ComputeUnit, Manager};
use crate::perf::{ProfiledProcess, Profiler};
use crate::rdma::RdmaCollector;
use crate::shell::Shell;
use crate::sink::{Sample, Sink};

pub struct ComputeUnitCollector {
    config: Arc<Config>,
    shell: Arc<Shell>,
    mode: CgroupMode,

    profiler: Option<Profiler>,
    ebpf: Option<EbpfCollector>,
    rdma: Option<RdmaCollector>,
    gpu: Option<GpuResolver>,
}

impl ComputeUnitCollector {
    /// Detects the cgroup API version and brings up every enabled
    /// sub-collector. A sub-collector whose startup fails (BPF verifier
    /// rejection, NVML init failure, missing RDMA tool) is disabled for
    /// the life of the process rather than failing the whole daemon,
    /// except cgroup-mode detection itself, which is fatal.
    pub fn new(config: Arc<Config>, shell: Arc<Shell>) -> Result<Self, DiscoveryError> {
        let mode = cgroup::version::detect(&config.cgroup_root, config.force_cgroup_mode)?;

        let profiler = config.perf_enabled.then(|| Profiler::new(config.perf_target_env.clone()));

        let ebpf = if config.ebpf_enabled {
            match EbpfCollector::load(&mode, config.ebpf_vfs_mounts.clone(), &shell) {
                Ok(collector) => Some(collector),
                Err(err) => {
                    shell.error(format!("eBPF: failed to load, disabling eBPF collector: {err}"));
                    None
                },
            }
        } else {
            None
        };

        let rdma = if config.rdma_enabled {
            let collector = RdmaCollector::new(config.rdma_tool.clone());
            collector.start(&shell);
            Some(collector)
        } else {
            None
        };

        let gpu = if config.gpu_enabled {
            let reindex = load_reindex_table(&config, &shell);
            Some(GpuResolver::new(config.gpu_prolog_map_dir.clone(), reindex, config.hostname.clone(), &shell))
        } else {
            None
        };

        Ok(Self { config, shell, mode, profiler, ebpf, rdma, gpu })
    }

    /// Runs one scrape for `manager`: discovery, fan-out, join, emit.
    pub fn scrape(&self, manager: Manager, sink: &impl Sink) {
        let records = cgroup::discover(&self.config.cgroup_root, manager, &self.mode, &self.shell);
        let units: Vec<ComputeUnit> = records
            .into_iter()
            .map(|cgroup| ComputeUnit { uuid: cgroup.uuid.clone(), manager, mode: self.mode.clone(), cgroup })
            .collect();

        sink.emit(
            Sample::gauge("units", units.len() as f64)
                .with_label("manager", manager.to_string())
                .with_label("host", self.config.hostname.clone()),
        );

        let pid_to_uuid: HashMap<u32, String> =
            units.iter().flat_map(|u| u.pids().into_iter().map(move |pid| (pid, u.uuid.clone()))).collect();

        let cgroups: Vec<_> = units.iter().map(|u| u.cgroup.clone()).collect();
        let profiled: Vec<ProfiledProcess> = units
            .iter()
            .flat_map(|u| {
                u.cgroup
                    .processes
                    .iter()
                    .filter(|p| !cgroup::manager::is_ignored_proc(manager, &p.cmdline))
                    .map(move |p| ProfiledProcess { uuid: u.uuid.clone(), pid: p.pid })
            })
            .collect();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for metric in counter::read_all(&cgroups, &self.mode, &self.shell) {
                    emit_cgmetric(&metric, sink);
                }
            });
            if let Some(profiler) = &self.profiler {
                scope.spawn(|| profiler.scrape(&profiled, sink, &self.shell));
            }
            if let Some(ebpf) = &self.ebpf {
                scope.spawn(|| ebpf.scrape(&cgroups, sink, &self.shell));
            }
            if let Some(rdma) = &self.rdma {
                scope.spawn(|| rdma.scrape(&pid_to_uuid, sink, &self.shell));
            }
            if let Some(gpu) = &self.gpu {
                scope.spawn(|| gpu.scrape(&units, sink, &self.shell));
            }
        });
    }

    /// Releases every kernel resource held by a sub-collector: closes
    /// perf fds, detaches BPF links, and restores any RDMA counter mode
    /// this process enabled.
    pub fn stop(&self) {
        if let Some(profiler) = &self.profiler {
            profiler.stop();
        }
        if let Some(ebpf) = &self.ebpf {
            ebpf.stop();
        }
        if let Some(rdma) = &self.rdma {
            rdma.stop(&self.shell);
        }
    }
}

fn load_reindex_table(config: &Config, shell: &Shell) -> ReindexTable {
    let Some(path) = &config.gpu_reindex_file else {
        return ReindexTable::default();
    };
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            shell.warn(format!("gpu: could not read reindex file {path:?}: {err}"));
            return ReindexTable::default();
        },
    };
    match ReindexTable::parse(&raw) {
        Ok(table) => table,
        Err(err) => {
            shell.warn(format!("gpu: reindex file {path:?} is malformed, ignoring: {err}"));
            ReindexTable::default()
        },
    }
}

/// Translates one cgroup's snapshot into the sink's flat `(metric,
/// labels, value)` triples. `*_total`/count-like fields are emitted as
/// counters; instantaneous usage and limits as gauges, per the metric
/// kind split the sink's type documents.
fn emit_cgmetric(metric: &CgMetric, sink: &impl Sink) {
    let uuid = || metric.uuid.clone();

    sink.emit(Sample::counter("cpu_user_seconds", metric.cpu_user_seconds).with_label("uuid", uuid()));
    sink.emit(Sample::counter("cpu_system_seconds", metric.cpu_system_seconds).with_label("uuid", uuid()));
    sink.emit(Sample::counter("cpu_total_seconds", metric.cpu_total_seconds).with_label("uuid", uuid()));
    sink.emit(Sample::counter("cpu_pressure_seconds", metric.cpu_pressure_seconds).with_label("uuid", uuid()));
    sink.emit(Sample::gauge("cpus", metric.cpus).with_label("uuid", uuid()));

    sink.emit(Sample::gauge("memory_rss_bytes", metric.memory_rss_bytes).with_label("uuid", uuid()));
    sink.emit(Sample::gauge("memory_cache_bytes", metric.memory_cache_bytes).with_label("uuid", uuid()));
    sink.emit(Sample::gauge("memory_used_bytes", metric.memory_used_bytes).with_label("uuid", uuid()));
    sink.emit(Sample::gauge("memory_total_bytes", metric.memory_total_bytes).with_label("uuid", uuid()));
    sink.emit(Sample::counter("memory_fail_count", metric.memory_fail_count).with_label("uuid", uuid()));
    sink.emit(Sample::counter("memory_pressure_seconds", metric.memory_pressure_seconds).with_label("uuid", uuid()));

    sink.emit(Sample::gauge("memsw_used_bytes", metric.memsw_used_bytes).with_label("uuid", uuid()));
    sink.emit(Sample::gauge("memsw_total_bytes", metric.memsw_total_bytes).with_label("uuid", uuid()));
    sink.emit(Sample::counter("memsw_fail_count", metric.memsw_fail_count).with_label("uuid", uuid()));

    for (device, handles) in &metric.rdma_hca_handles {
        sink.emit(Sample::gauge("rdma_hca_handles", *handles).with_label("uuid", uuid()).with_label("device", device.clone()));
    }
    for (device, objects) in &metric.rdma_hca_objects {
        sink.emit(Sample::gauge("rdma_hca_objects", *objects).with_label("uuid", uuid()).with_label("device", device.clone()));
    }

    for (device, counters) in &metric.blkio {
        sink.emit(
            Sample::counter("blkio_read_bytes", counters.read_bytes)
                .with_label("uuid", uuid())
                .with_label("device", device.clone()),
        );
        sink.emit(
            Sample::counter("blkio_write_bytes", counters.write_bytes)
                .with_label("uuid", uuid())
                .with_label("device", device.clone()),
        );
        sink.emit(
            Sample::counter("blkio_read_reqs", counters.read_reqs)
                .with_label("uuid", uuid())
                .with_label("device", device.clone()),
        );
        sink.emit(
            Sample::counter("blkio_write_reqs", counters.write_reqs)
                .with_label("uuid", uuid())
                .with_label("device", device.clone()),
        );
    }
    sink.emit(Sample::counter("blkio_pressure_seconds", metric.blkio_pressure_seconds).with_label("uuid", uuid()));

    sink.emit(Sample::gauge("collect_error", if metric.err { 1.0 } else { 0.0 }).with_label("uuid", uuid()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::ChannelSink;

    #[test]
    fn emit_cgmetric_sets_collect_error_flag() {
        let (sink, rx) = ChannelSink::new();
        let metric = CgMetric::errored("1009249".to_owned());
        emit_cgmetric(&metric, &sink);
        drop(sink);

        let samples: Vec<_> = rx.iter().collect();
        let flag = samples.iter().find(|s| s.name == "collect_error").unwrap();
        assert_eq!(flag.value, 1.0);
    }
}
