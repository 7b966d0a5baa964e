//! eBPF Collector: loads the VFS and network accumulator objects,
//! attaches their probes, and on each scrape aggregates the kernel-side
//! per-cgroup-inode accumulators back to unit uuids.

use std::collections::HashMap;
use std::sync::Mutex;

use aya::maps::HashMap as BpfMap;
use aya::programs::{FExit, KProbe, KRetProbe};
use aya::Ebpf;
use jobmetrics_common::{map_names, BpfConfig, ByteCounter, CallCounter, CgroupKey, NetKey, PacketCounter, VfsKey};

use crate::cgroup::version::{CGROUP2_MAGIC, CGROUP_MAGIC};
use crate::ebpf::objects::{self, AttachKind};
use crate::error::EbpfError;
use crate::model::{CgroupMode, CgroupRecord};
use crate::shell::Shell;
use crate::sink::{Sample, Sink};
use crate::util;

const VFS_PROGRAMS: &[(&str, bool)] = &[
    ("kprobe_vfs_write", false),
    ("kretprobe_vfs_write", true),
    ("kprobe_vfs_read", false),
    ("kretprobe_vfs_read", true),
    ("kprobe_vfs_open", false),
    ("kprobe_vfs_create", false),
    ("kprobe_vfs_unlink", false),
];

const NET_KPROBE_PROGRAMS: &[&str] = &[
    "kprobe_tcp_sendmsg",
    "kprobe_tcp_recvmsg",
    "kprobe_tcp_retransmit_skb",
    "kprobe_udp_sendmsg",
    "kprobe_udp_recvmsg",
];

pub struct EbpfCollector {
    vfs_bpf: Mutex<Option<Ebpf>>,
    net_bpf: Mutex<Option<Ebpf>>,
    inode_to_uuid: Mutex<HashMap<u64, String>>,
    vfs_mount_filter: Vec<String>,
}

impl EbpfCollector {
    /// Loads both objects, populates the config map, and attaches probes
    /// appropriate to the running kernel. A BPF verifier failure here is
    /// fatal for this sub-collector only, per the error handling design.
    pub fn load(mode: &CgroupMode, vfs_mount_filter: Vec<String>, shell: &Shell) -> Result<Self, EbpfError> {
        let kernel = objects::running_kernel();
        let config = bpf_config(mode);

        let vfs_bpf = if objects::vfs_supported(kernel) {
            Some(load_vfs(&config)?)
        } else {
            shell.warn(format!("eBPF: kernel {}.{} has no supported VFS object, disabling VFS accounting", kernel.0, kernel.1));
            None
        };

        let net_bpf = match objects::net_attach_kind(kernel) {
            Some(kind) => Some(load_net(&config, kind)?),
            None => {
                shell.warn(format!("eBPF: kernel {}.{} has no supported network object, disabling network accounting", kernel.0, kernel.1));
                None
            },
        };

        Ok(Self {
            vfs_bpf: Mutex::new(vfs_bpf),
            net_bpf: Mutex::new(net_bpf),
            inode_to_uuid: Mutex::new(HashMap::new()),
            vfs_mount_filter,
        })
    }

    /// Rebuilds the inode→uuid cache from the current discovery set,
    /// reads every accumulator map, aggregates by uuid, and emits
    /// samples. Entries for cgroups no longer active are dropped from
    /// the cache, not from the BPF maps themselves (the kernel owns
    /// those).
    pub fn scrape(&self, cgroups: &[CgroupRecord], sink: &impl Sink, shell: &Shell) {
        {
            let mut cache = self.inode_to_uuid.lock().unwrap();
            cache.clear();
            for cgroup in cgroups {
                cache.insert(cgroup.inode, cgroup.uuid.clone());
            }
        }

        if let Some(bpf) = self.vfs_bpf.lock().unwrap().as_mut() {
            self.scrape_vfs(bpf, sink, shell);
        }
        if let Some(bpf) = self.net_bpf.lock().unwrap().as_mut() {
            self.scrape_net(bpf, sink, shell);
        }
    }

    fn scrape_vfs(&self, bpf: &mut Ebpf, sink: &impl Sink, shell: &Shell) {
        let cache = self.inode_to_uuid.lock().unwrap();

        for (map_name, metric_name) in [
            (map_names::WRITE_ACCUMULATOR, "vfs_write"),
            (map_names::READ_ACCUMULATOR, "vfs_read"),
        ] {
            let Some(map) = bpf.map(map_name) else { continue };
            let Ok(typed): Result<BpfMap<_, VfsKey, ByteCounter>, _> = BpfMap::try_from(map) else {
                continue;
            };
            let mut by_uuid: HashMap<(String, String), ByteCounter> = HashMap::new();
            for entry in typed.iter().flatten() {
                let (key, value) = entry;
                let Some(uuid) = cache.get(&key.cgroup_inode) else { continue };
                let mount = mount_str(&key.mount);
                if !self.vfs_mount_filter.is_empty() && !self.vfs_mount_filter.iter().any(|m| mount.contains(m)) {
                    continue;
                }
                let slot = by_uuid.entry((uuid.clone(), mount)).or_insert_with(ByteCounter::default);
                slot.bytes += value.bytes;
                slot.calls += value.calls;
                slot.errors += value.errors;
            }
            for ((uuid, mount), counter) in by_uuid {
                sink.emit(
                    Sample::counter(metric_name, counter.bytes as f64)
                        .with_label("uuid", uuid.clone())
                        .with_label("mountpoint", mount.clone()),
                );
            }
        }

        for (map_name, metric_name) in [
            (map_names::OPEN_ACCUMULATOR, "vfs_open"),
            (map_names::CREATE_ACCUMULATOR, "vfs_create"),
            (map_names::UNLINK_ACCUMULATOR, "vfs_unlink"),
        ] {
            let Some(map) = bpf.map(map_name) else { continue };
            let Ok(typed): Result<BpfMap<_, CgroupKey, CallCounter>, _> = BpfMap::try_from(map) else {
                continue;
            };
            for entry in typed.iter().flatten() {
                let (key, value) = entry;
                let Some(uuid) = cache.get(&key.cgroup_inode) else { continue };
                sink.emit(Sample::counter(metric_name, value.calls as f64).with_label("uuid", uuid.clone()));
            }
        }

        let _ = shell;
    }

    fn scrape_net(&self, bpf: &mut Ebpf, sink: &impl Sink, shell: &Shell) {
        let cache = self.inode_to_uuid.lock().unwrap();

        for (map_name, metric_name) in [
            (map_names::INGRESS_ACCUMULATOR, "net_ingress"),
            (map_names::EGRESS_ACCUMULATOR, "net_egress"),
            (map_names::RETRANS_ACCUMULATOR, "net_retransmit"),
        ] {
            let Some(map) = bpf.map(map_name) else { continue };
            let Ok(typed): Result<BpfMap<_, NetKey, PacketCounter>, _> = BpfMap::try_from(map) else {
                continue;
            };
            for entry in typed.iter().flatten() {
                let (key, value) = entry;
                let Some(uuid) = cache.get(&key.cgroup_inode) else { continue };
                sink.emit(
                    Sample::counter(metric_name, value.bytes as f64)
                        .with_label("uuid", uuid.clone())
                        .with_label("proto", key.proto.to_string())
                        .with_label("family", key.family.to_string()),
                );
            }
        }

        let _ = shell;
    }

    /// Detaches every link this collector attached; the `Ebpf` handles
    /// being dropped takes care of closing the underlying program/link
    /// and map fds.
    pub fn stop(&self) {
        self.vfs_bpf.lock().unwrap().take();
        self.net_bpf.lock().unwrap().take();
    }
}

fn bpf_config(mode: &CgroupMode) -> BpfConfig {
    match mode {
        CgroupMode::Unified => BpfConfig { cgroup_subsys_idx: 0, cgrp_fs_magic: CGROUP2_MAGIC as u64 },
        CgroupMode::Legacy(controller) => BpfConfig {
            cgroup_subsys_idx: util::cgroup_controller_index(controller).unwrap_or(0),
            cgrp_fs_magic: CGROUP_MAGIC as u64,
        },
    }
}

fn load_vfs(config: &BpfConfig) -> Result<Ebpf, EbpfError> {
    let mut bpf = Ebpf::load(objects::VFS_OBJECT).map_err(|e| EbpfError::Load(e.to_string()))?;
    populate_config(&mut bpf, config)?;

    for (name, is_retprobe) in VFS_PROGRAMS {
        let symbol = name.splitn(2, '_').nth(1).unwrap_or(name);
        if *is_retprobe {
            attach_kretprobe(&mut bpf, name, symbol)?;
        } else {
            attach_kprobe(&mut bpf, name, symbol)?;
        }
    }
    Ok(bpf)
}

fn load_net(config: &BpfConfig, kind: AttachKind) -> Result<Ebpf, EbpfError> {
    let mut bpf = Ebpf::load(objects::NET_OBJECT).map_err(|e| EbpfError::Load(e.to_string()))?;
    populate_config(&mut bpf, config)?;

    match kind {
        AttachKind::Kprobe => {
            for name in NET_KPROBE_PROGRAMS {
                let symbol = name.strip_prefix("kprobe_").unwrap_or(name);
                attach_kprobe(&mut bpf, name, symbol)?;
            }
        },
        AttachKind::Fentry => {
            // fentry/fexit coverage is currently only grounded for
            // tcp_sendmsg; every other traced function keeps using its
            // kprobe form regardless of kernel version.
            for name in NET_KPROBE_PROGRAMS.iter().filter(|n| **n != "kprobe_tcp_sendmsg") {
                let symbol = name.strip_prefix("kprobe_").unwrap_or(name);
                attach_kprobe(&mut bpf, name, symbol)?;
            }
            attach_fexit(&mut bpf, "fexit_tcp_sendmsg")?;
        },
    }
    Ok(bpf)
}

fn populate_config(bpf: &mut Ebpf, config: &BpfConfig) -> Result<(), EbpfError> {
    let map = bpf
        .map_mut(map_names::CONFIG)
        .ok_or_else(|| EbpfError::MapRead(map_names::CONFIG.into(), "map not found in object".into()))?;
    let mut typed: BpfMap<_, u32, BpfConfig> =
        BpfMap::try_from(map).map_err(|e| EbpfError::MapRead(map_names::CONFIG.into(), e.to_string()))?;
    typed
        .insert(0, config, 0)
        .map_err(|e| EbpfError::MapRead(map_names::CONFIG.into(), e.to_string()))
}

fn attach_kprobe(bpf: &mut Ebpf, program: &str, symbol: &str) -> Result<(), EbpfError> {
    let prog: &mut KProbe = bpf
        .program_mut(program)
        .ok_or_else(|| EbpfError::Attach { program: program.into(), source: std::io::Error::from(std::io::ErrorKind::NotFound) })?
        .try_into()
        .map_err(|_| EbpfError::Load(format!("{program} is not a kprobe")))?;
    prog.load().map_err(|e| EbpfError::Load(e.to_string()))?;
    prog.attach(symbol, 0)
        .map_err(|e| EbpfError::Attach { program: program.into(), source: std::io::Error::other(e.to_string()) })?;
    Ok(())
}

fn attach_kretprobe(bpf: &mut Ebpf, program: &str, symbol: &str) -> Result<(), EbpfError> {
    let prog: &mut KRetProbe = bpf
        .program_mut(program)
        .ok_or_else(|| EbpfError::Attach { program: program.into(), source: std::io::Error::from(std::io::ErrorKind::NotFound) })?
        .try_into()
        .map_err(|_| EbpfError::Load(format!("{program} is not a kretprobe")))?;
    prog.load().map_err(|e| EbpfError::Load(e.to_string()))?;
    prog.attach(symbol, 0)
        .map_err(|e| EbpfError::Attach { program: program.into(), source: std::io::Error::other(e.to_string()) })?;
    Ok(())
}

/// Attaches a BTF-based `fexit` program. Unlike `KProbe::attach`, the
/// traced function is fixed by the `#[fexit(function = "...")]` macro
/// attribute at compile time, so there is no symbol argument here.
fn attach_fexit(bpf: &mut Ebpf, program: &str) -> Result<(), EbpfError> {
    let prog: &mut FExit = bpf
        .program_mut(program)
        .ok_or_else(|| EbpfError::Attach { program: program.into(), source: std::io::Error::from(std::io::ErrorKind::NotFound) })?
        .try_into()
        .map_err(|_| EbpfError::Load(format!("{program} is not an fexit program")))?;
    prog.load().map_err(|e| EbpfError::Load(e.to_string()))?;
    prog.attach()
        .map_err(|e| EbpfError::Attach { program: program.into(), source: std::io::Error::other(e.to_string()) })?;
    Ok(())
}

fn mount_str(raw: &[u8]) -> String {
    let len = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..len]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_str_stops_at_nul() {
        let mut buf = [0u8; 8];
        buf[..4].copy_from_slice(b"/mnt");
        assert_eq!(mount_str(&buf), "/mnt");
    }
}
