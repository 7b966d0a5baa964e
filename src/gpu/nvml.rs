//! NVML device and MIG instance enumeration: the init/device walk
//! `nvml-wrapper` exposes, extended to read MIG instances and apply a
//! user-supplied reindexing table.

use std::collections::HashMap;

use crate::error::GpuResolveError;
use crate::model::{GpuDevice, MigInstance};
use crate::shell::Shell;

#[cfg(feature = "gpu")]
pub struct Nvml {
    handle: nvml_wrapper::Nvml,
}

/// Stand-in used when the crate is built without the `gpu` feature, so
/// [`GpuResolver`](super::GpuResolver) does not need a second code path:
/// `try_init` always returns `None`, exactly as if no NVIDIA driver were
/// present on the host.
#[cfg(not(feature = "gpu"))]
pub struct Nvml;

#[cfg(not(feature = "gpu"))]
impl Nvml {
    #[must_use]
    pub fn try_init(_shell: &Shell) -> Option<Self> { None }

    pub fn devices(&self, _reindex: &ReindexTable) -> Result<Vec<GpuDevice>, GpuResolveError> { Ok(Vec::new()) }
}

#[cfg(feature = "gpu")]
impl Nvml {
    /// Tries the default driver library path, then the NixOS-specific
    /// path. Returns `None` when no NVIDIA driver is present, which is
    /// the common case for most nodes this exporter runs on.
    #[must_use]
    pub fn try_init(shell: &Shell) -> Option<Self> {
        let handle = nvml_wrapper::Nvml::init().or_else(|_| {
            nvml_wrapper::Nvml::builder().lib_path(std::ffi::OsStr::new("/run/opengl-driver/lib/libnvidia-ml.so")).init()
        });
        match handle {
            Ok(handle) => Some(Self { handle }),
            Err(err) => {
                shell.debug(format!("nvml: init failed, GPU resolution disabled: {err}"));
                None
            },
        }
    }

    /// Enumerates every device, including MIG instances when MIG is
    /// enabled, applying `reindex` to each device's and instance's
    /// slurm-assigned `global_index`.
    pub fn devices(&self, reindex: &ReindexTable) -> Result<Vec<GpuDevice>, GpuResolveError> {
        let count = self.handle.device_count().map_err(|e| GpuResolveError::Nvml(e.to_string()))?;
        let mut devices = Vec::with_capacity(count as usize);

        for slurm_index in 0..count {
            let device = match self.handle.device_by_index(slurm_index) {
                Ok(device) => device,
                Err(err) => return Err(GpuResolveError::Nvml(err.to_string())),
            };
            let uuid = device.uuid().map_err(|e| GpuResolveError::Nvml(e.to_string()))?;
            let mig_enabled = device.is_mig_mode_supported().unwrap_or(false) && device.mig_mode().map(|m| m.0.into()).unwrap_or(false);

            let mut mig_instances = Vec::new();
            if mig_enabled {
                if let Ok(count) = device.max_mig_device_count() {
                    for gi in 0..count as u32 {
                        if let Ok(mig) = device.mig_device_by_index(gi) {
                            let sm_fraction = mig_sm_fraction(&mig).unwrap_or(1.0);
                            let vendor_index = reindex.resolve(slurm_index, Some(gi)).unwrap_or(slurm_index);
                            mig_instances.push(MigInstance { global_index: vendor_index, gpu_inst_id: gi, sm_fraction });
                        }
                    }
                }
            }

            let vendor_index = reindex.resolve(slurm_index, None).unwrap_or(slurm_index);
            devices.push(GpuDevice { global_index: vendor_index, uuid, mig_enabled, mig_instances });
        }
        Ok(devices)
    }
}

#[cfg(feature = "gpu")]
fn mig_sm_fraction(_mig: &nvml_wrapper::device::Device) -> Option<f64> {
    // nvml-wrapper does not expose the GPU instance profile's SM
    // fraction directly; until that lands upstream this returns the
    // conservative default of a full slice (1.0), same as a full GPU.
    None
}

/// A user-supplied table mapping slurm's device ordering onto the
/// vendor tool's ordering, optionally down to a specific MIG instance
/// (`slurm_index.mig_gi_id`).
#[derive(Debug, Clone, Default)]
pub struct ReindexTable {
    device: HashMap<u32, u32>,
    mig: HashMap<(u32, u32), u32>,
}

impl ReindexTable {
    /// Parses lines of the form `slurm_index=vendor_index` or
    /// `slurm_index.mig_gi_id=vendor_index`.
    pub fn parse(raw: &str) -> Result<Self, GpuResolveError> {
        let mut table = Self::default();
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (lhs, rhs) = line.split_once('=').ok_or_else(|| GpuResolveError::MalformedReindex(line.to_owned()))?;
            let vendor_index: u32 = rhs.trim().parse().map_err(|_| GpuResolveError::MalformedReindex(line.to_owned()))?;

            if let Some((slurm_index, gi)) = lhs.split_once('.') {
                let slurm_index: u32 = slurm_index.trim().parse().map_err(|_| GpuResolveError::MalformedReindex(line.to_owned()))?;
                let gi: u32 = gi.trim().parse().map_err(|_| GpuResolveError::MalformedReindex(line.to_owned()))?;
                table.mig.insert((slurm_index, gi), vendor_index);
            } else {
                let slurm_index: u32 = lhs.trim().parse().map_err(|_| GpuResolveError::MalformedReindex(line.to_owned()))?;
                table.device.insert(slurm_index, vendor_index);
            }
        }
        Ok(table)
    }

    #[must_use]
    pub fn resolve(&self, slurm_index: u32, mig_gi_id: Option<u32>) -> Option<u32> {
        if let Some(gi) = mig_gi_id {
            if let Some(mapped) = self.mig.get(&(slurm_index, gi)) {
                return Some(*mapped);
            }
        }
        self.device.get(&slurm_index).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reindex_table_maps_plain_device_indices() {
        let table = ReindexTable::parse("0=2\n1=3\n").unwrap();
        assert_eq!(table.resolve(0, None), Some(2));
        assert_eq!(table.resolve(1, None), Some(3));
        assert_eq!(table.resolve(2, None), None);
    }

    #[test]
    fn reindex_table_prefers_mig_specific_mapping() {
        let table = ReindexTable::parse("0.1=5\n0=2\n").unwrap();
        assert_eq!(table.resolve(0, Some(1)), Some(5));
        assert_eq!(table.resolve(0, Some(2)), Some(2));
    }

    #[test]
    fn reindex_table_rejects_malformed_lines() {
        assert!(ReindexTable::parse("not-a-mapping").is_err());
    }
}
