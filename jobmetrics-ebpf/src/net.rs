#![no_std]
#![no_main]

//! Network accounting probes.
//!
//! Attaches to the TCP/UDP send/receive/retransmit paths and accumulates
//! packet and byte counts per `{cgroup_inode, proto, family}`. On newer
//! kernels the loader selects the `fentry_*`/`fexit_*` variants of these
//! same probe names (see `jobmetrics::ebpf::objects`); the accounting
//! logic is identical, only the attach mechanism differs.

use aya_ebpf::{
    helpers::{bpf_get_current_task, bpf_probe_read_kernel},
    macros::{fexit, kprobe, map},
    maps::HashMap,
    programs::{FExitContext, ProbeContext},
};
use jobmetrics_common::{BpfConfig, NetKey, PacketCounter};

const IPPROTO_TCP: u16 = 6;
const IPPROTO_UDP: u16 = 17;
const AF_INET: u16 = 2;

/// `CGROUP2_SUPER_MAGIC`, from `linux/magic.h`; mirrors
/// `jobmetrics::cgroup::version::CGROUP2_MAGIC` on the userspace side.
const CGROUP2_SUPER_MAGIC: u64 = 0x6367_7270;

/// Upper bound on the legacy v1 subsystem array; see
/// `vfs::MAX_CGROUP_SUBSYS` for why this is a bound rather than the real
/// `CGROUP_SUBSYS_COUNT`.
const MAX_CGROUP_SUBSYS: usize = 16;

#[map(name = "CONFIG_MAP")]
static CONFIG_MAP: HashMap<u32, BpfConfig> = HashMap::with_max_entries(1, 0);

#[map(name = "ingress_accumulator")]
static INGRESS_ACCUMULATOR: HashMap<NetKey, PacketCounter> = HashMap::with_max_entries(4096, 0);

#[map(name = "egress_accumulator")]
static EGRESS_ACCUMULATOR: HashMap<NetKey, PacketCounter> = HashMap::with_max_entries(4096, 0);

#[map(name = "retrans_accumulator")]
static RETRANS_ACCUMULATOR: HashMap<NetKey, PacketCounter> = HashMap::with_max_entries(4096, 0);

/// Resolves the cgroup inode of the current task for the hierarchy named
/// by `CONFIG_MAP`. Mirrors `jobmetrics_ebpf::vfs::current_cgroup_inode`;
/// duplicated rather than shared since each probe set builds as its own
/// `no_std` binary crate.
fn current_cgroup_inode() -> Option<u64> {
    let config = unsafe { CONFIG_MAP.get(&0) }?;
    let task = unsafe { bpf_get_current_task() } as *const u8;
    if task.is_null() {
        return None;
    }
    // SAFETY: `bpf_probe_read_kernel` validates every access against the
    // verifier's known memory regions; a failed read yields `Err` rather
    // than faulting, which the chase below propagates as `None`.
    unsafe { read_cgroup_inode(task, config.cgroup_subsys_idx, config.cgrp_fs_magic) }
}

#[repr(C)]
struct TaskStruct {
    // See `vfs::TaskStruct`: placeholder offset patched by CO-RE
    // relocation at attach time.
    _pad0: [u8; 0],
    pub cgroups: *const CssSet,
}

#[repr(C)]
struct CssSet {
    _pad0: [u8; 0],
    pub subsys: [*const CgroupSubsysState; MAX_CGROUP_SUBSYS],
    pub dfl_cgrp: *const Cgroup,
}

#[repr(C)]
struct CgroupSubsysState {
    _pad0: [u8; 0],
    pub cgroup: *const Cgroup,
}

#[repr(C)]
struct Cgroup {
    _pad0: [u8; 0],
    pub kn: *const KernfsNode,
}

#[repr(C)]
struct KernfsNode {
    _pad0: [u8; 0],
    pub id: u64,
}

/// Walks from `task_struct` down to the active cgroup's directory inode
/// number. See `vfs::read_cgroup_inode` for the field chain; duplicated
/// here rather than shared since each probe set builds as its own
/// `no_std` binary crate.
unsafe fn read_cgroup_inode(task: *const u8, subsys_idx: u32, fs_magic: u64) -> Option<u64> {
    let task = task as *const TaskStruct;
    let css_set: *const CssSet = bpf_probe_read_kernel(&(*task).cgroups).ok()?;
    if css_set.is_null() {
        return None;
    }

    let cgrp: *const Cgroup = if fs_magic == CGROUP2_SUPER_MAGIC {
        bpf_probe_read_kernel(&(*css_set).dfl_cgrp).ok()?
    } else {
        if subsys_idx as usize >= MAX_CGROUP_SUBSYS {
            return None;
        }
        let css: *const CgroupSubsysState =
            bpf_probe_read_kernel(&(*css_set).subsys[subsys_idx as usize]).ok()?;
        if css.is_null() {
            return None;
        }
        bpf_probe_read_kernel(&(*css).cgroup).ok()?
    };
    if cgrp.is_null() {
        return None;
    }

    let kn: *const KernfsNode = bpf_probe_read_kernel(&(*cgrp).kn).ok()?;
    if kn.is_null() {
        return None;
    }
    bpf_probe_read_kernel(&(*kn).id).ok()
}

fn bump(map: &HashMap<NetKey, PacketCounter>, key: NetKey, bytes: u64) {
    unsafe {
        match map.get_ptr_mut(&key) {
            Some(entry) => {
                let entry = &mut *entry;
                entry.packets += 1;
                entry.bytes += bytes;
            },
            None => {
                let _ = map.insert(&key, &PacketCounter { packets: 1, bytes }, 0);
            },
        }
    }
}

#[kprobe]
pub fn kprobe_tcp_sendmsg(ctx: ProbeContext) -> u32 {
    let size: u64 = ctx.arg(2).unwrap_or(0);
    record(&EGRESS_ACCUMULATOR, IPPROTO_TCP, size);
    0
}

#[kprobe]
pub fn kprobe_tcp_recvmsg(ctx: ProbeContext) -> u32 {
    let _ = &ctx;
    record(&INGRESS_ACCUMULATOR, IPPROTO_TCP, 0);
    0
}

#[kprobe]
pub fn kprobe_tcp_retransmit_skb(ctx: ProbeContext) -> u32 {
    let _ = &ctx;
    record(&RETRANS_ACCUMULATOR, IPPROTO_TCP, 0);
    0
}

#[kprobe]
pub fn kprobe_udp_sendmsg(ctx: ProbeContext) -> u32 {
    let size: u64 = ctx.arg(2).unwrap_or(0);
    record(&EGRESS_ACCUMULATOR, IPPROTO_UDP, size);
    0
}

#[kprobe]
pub fn kprobe_udp_recvmsg(ctx: ProbeContext) -> u32 {
    let _ = &ctx;
    record(&INGRESS_ACCUMULATOR, IPPROTO_UDP, 0);
    0
}

/// Same accounting as the kprobe variants above, attached via `fexit` on
/// kernels where the function is BTF-addressable (selected by the
/// loader; see `objects.rs`). The target function is fixed at compile
/// time by the macro attribute; `FExit::attach` takes no symbol argument.
#[fexit(function = "tcp_sendmsg")]
pub fn fexit_tcp_sendmsg(ctx: FExitContext) -> u32 {
    let _ = &ctx;
    record(&EGRESS_ACCUMULATOR, IPPROTO_TCP, 0);
    0
}

fn record(map: &HashMap<NetKey, PacketCounter>, proto: u16, bytes: u64) {
    if let Some(inode) = current_cgroup_inode() {
        bump(map, NetKey {
            cgroup_inode: inode,
            proto,
            family: AF_INET,
        }, bytes);
    }
}

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}
