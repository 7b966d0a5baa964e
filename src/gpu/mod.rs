//! GPU Ordinal Resolver: for each compute unit, determines which GPU
//! global indices (including MIG instances) are bound to it, trying the
//! prolog-file strategy first and falling back to scanning process
//! environments under a security context.

pub mod nvml;
pub mod prolog;
pub mod slurm_env;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use caps::Capability;

use crate::model::{ComputeUnit, GpuDevice, GpuOrdinal};
use crate::security::SecurityContext;
use crate::shell::Shell;
use crate::sink::{Sample, Sink};
use nvml::{Nvml, ReindexTable};

pub struct GpuResolver {
    nvml: Option<Nvml>,
    reindex: ReindexTable,
    prolog_dir: Option<PathBuf>,
    security: SecurityContext,
    hostname: String,

    /// Ordinals resolved for each unit, kept until the unit disappears
    /// from discovery rather than recomputed every scrape: once a job's
    /// GPU assignment is known it cannot change for the life of the job.
    ordinal_cache: Mutex<HashMap<String, Vec<GpuOrdinal>>>,
}

impl GpuResolver {
    #[must_use]
    pub fn new(prolog_dir: Option<PathBuf>, reindex: ReindexTable, hostname: String, shell: &Shell) -> Self {
        Self {
            nvml: Nvml::try_init(shell),
            reindex,
            prolog_dir,
            security: SecurityContext::new(
                "gpu-environ-scan",
                vec![Capability::CAP_SYS_PTRACE, Capability::CAP_DAC_READ_SEARCH],
            ),
            hostname,
            ordinal_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves and emits GPU ordinal samples for every unit, reusing
    /// the cached assignment for units already resolved. Evicts cache
    /// entries for units absent from this scrape, per the per-scrape
    /// cache-eviction invariant.
    pub fn scrape(&self, units: &[ComputeUnit], sink: &impl Sink, shell: &Shell) {
        let Some(nvml) = &self.nvml else { return };
        let devices = match nvml.devices(&self.reindex) {
            Ok(devices) => devices,
            Err(err) => {
                shell.debug(format!("gpu: device enumeration failed this scrape: {err}"));
                return;
            },
        };

        let mut cache = self.ordinal_cache.lock().unwrap();
        for unit in units {
            if !cache.contains_key(&unit.uuid) {
                let ordinals = self.resolve_unit(&unit.uuid, unit, &devices, shell);
                cache.insert(unit.uuid.clone(), ordinals);
            }
        }
        cache.retain(|uuid, _| units.iter().any(|u| &u.uuid == uuid));

        for (uuid, ordinals) in cache.iter() {
            for ordinal in ordinals {
                sink.emit(
                    Sample::gauge("gpu_ordinal", ordinal.value)
                        .with_label("uuid", uuid.clone())
                        .with_label("index", ordinal.global_index.to_string())
                        .with_label("hindex", ordinal.hindex.clone())
                        .with_label("gpuuuid", ordinal.gpu_uuid.clone()),
                );
            }
        }
    }

    fn resolve_unit(&self, uuid: &str, unit: &ComputeUnit, devices: &[GpuDevice], shell: &Shell) -> Vec<GpuOrdinal> {
        if let Some(prolog_dir) = &self.prolog_dir {
            let from_prolog = self.resolve_via_prolog(prolog_dir, uuid, devices);
            if !from_prolog.is_empty() {
                return from_prolog;
            }
        }
        self.resolve_via_environ(uuid, unit, devices, shell)
    }

    fn resolve_via_prolog(&self, prolog_dir: &std::path::Path, uuid: &str, devices: &[GpuDevice]) -> Vec<GpuOrdinal> {
        let mut ordinals = Vec::new();
        for device in devices {
            if prolog::owns(prolog_dir, device.global_index, uuid) {
                ordinals.push(self.ordinal_for_full_device(device));
            }
            for mig in &device.mig_instances {
                if prolog::owns(prolog_dir, mig.global_index, uuid) {
                    ordinals.push(GpuOrdinal {
                        global_index: mig.global_index,
                        gpu_uuid: device.uuid.clone(),
                        hindex: self.hindex(mig.global_index),
                        value: mig.sm_fraction,
                    });
                }
            }
        }
        ordinals
    }

    /// Sweeps every process attached to `unit`'s cgroup sequentially
    /// inside a single security-context callback, per the rule that new
    /// threads do not inherit raised capabilities.
    fn resolve_via_environ(&self, uuid: &str, unit: &ComputeUnit, devices: &[GpuDevice], shell: &Shell) -> Vec<GpuOrdinal> {
        let pids: Vec<u32> = unit.pids();
        let result = self.security.run(|| {
            pids.iter()
                .filter_map(|pid| crate::util::read_environ(*pid))
                .collect::<Vec<_>>()
        });

        let environs = match result {
            Ok(environs) => environs,
            Err(err) => {
                shell.warn(format!("gpu: environment strategy disabled, capability acquisition failed: {err}"));
                return Vec::new();
            },
        };

        let indices = slurm_env::resolve(uuid, &environs);
        indices
            .into_iter()
            .filter_map(|index| devices.iter().find(|d| d.global_index == index))
            .map(|device| self.ordinal_for_full_device(device))
            .collect()
    }

    fn ordinal_for_full_device(&self, device: &GpuDevice) -> GpuOrdinal {
        GpuOrdinal {
            global_index: device.global_index,
            gpu_uuid: device.uuid.clone(),
            hindex: self.hindex(device.global_index),
            value: 1.0,
        }
    }

    fn hindex(&self, index: u32) -> String { format!("{}-gpu-{index}", self.hostname) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hindex_format() {
        let resolver = GpuResolver {
            nvml: None,
            reindex: ReindexTable::default(),
            prolog_dir: None,
            security: SecurityContext::new("test", vec![]),
            hostname: "node01".to_owned(),
            ordinal_cache: Mutex::new(HashMap::new()),
        };
        assert_eq!(resolver.hindex(2), "node01-gpu-2");
    }
}
