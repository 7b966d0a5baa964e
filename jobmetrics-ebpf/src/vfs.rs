#![no_std]
#![no_main]

//! VFS accounting probes.
//!
//! Attaches `kprobe`/`kretprobe` pairs on `vfs_write`, `vfs_read`,
//! `vfs_open`, `vfs_create` and `vfs_unlink`/`vfs_unlinkat`, resolving the
//! calling task's cgroup inode (under whichever hierarchy `CONFIG_MAP`
//! says is active) and accumulating byte counts and call counts keyed by
//! that inode. Userspace only ever reads these maps; eviction of stale
//! inodes happens on the userspace side once a cgroup directory is gone.

use aya_ebpf::{
    helpers::{bpf_get_current_pid_tgid, bpf_get_current_task, bpf_probe_read_kernel},
    macros::{kprobe, kretprobe, map},
    maps::HashMap,
    programs::{ProbeContext, RetProbeContext},
};
use jobmetrics_common::{
    map_names, BpfConfig, ByteCounter, CallCounter, CgroupKey, VfsKey, MOUNT_LEN,
};

/// `CGROUP2_SUPER_MAGIC`, from `linux/magic.h`; mirrors
/// `jobmetrics::cgroup::version::CGROUP2_MAGIC` on the userspace side.
const CGROUP2_SUPER_MAGIC: u64 = 0x6367_7270;

/// Upper bound on the legacy v1 subsystem array; the real
/// `CGROUP_SUBSYS_COUNT` is kernel-config-dependent but never exceeds
/// this on any kernel this collector targets. Bounds-checked before
/// indexing so the verifier accepts the access.
const MAX_CGROUP_SUBSYS: usize = 16;

#[map(name = "CONFIG_MAP")]
static CONFIG_MAP: HashMap<u32, BpfConfig> = HashMap::with_max_entries(1, 0);

#[map(name = "write_accumulator")]
static WRITE_ACCUMULATOR: HashMap<VfsKey, ByteCounter> = HashMap::with_max_entries(10240, 0);

#[map(name = "read_accumulator")]
static READ_ACCUMULATOR: HashMap<VfsKey, ByteCounter> = HashMap::with_max_entries(10240, 0);

#[map(name = "open_accumulator")]
static OPEN_ACCUMULATOR: HashMap<CgroupKey, CallCounter> = HashMap::with_max_entries(4096, 0);

#[map(name = "create_accumulator")]
static CREATE_ACCUMULATOR: HashMap<CgroupKey, CallCounter> = HashMap::with_max_entries(4096, 0);

#[map(name = "unlink_accumulator")]
static UNLINK_ACCUMULATOR: HashMap<CgroupKey, CallCounter> = HashMap::with_max_entries(4096, 0);

/// Per-thread scratch holding the cgroup inode resolved at a
/// `vfs_write`/`vfs_read` kprobe entry, consumed by the matching
/// kretprobe so the byte count recorded there (taken from the return
/// value) is attributed to the same cgroup the call entered with.
#[map(name = "pending_vfs_call")]
static PENDING_VFS_CALL: HashMap<u32, u64> = HashMap::with_max_entries(4096, 0);

/// Resolves the cgroup inode of the current task for the hierarchy named
/// by `CONFIG_MAP`. Returns `None` before the config entry has been
/// populated (i.e. before userspace has finished startup).
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
    // Only the field this probe reads; the real `task_struct` carries
    // many members before `cgroups`, so this offset is a placeholder
    // the eBPF loader's CO-RE relocation patches to match the running
    // kernel's BTF, the same approach used for `TaskStruct` elsewhere in
    // this codebase's eBPF programs.
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
/// number: `task->cgroups->subsys[subsys_idx]->cgroup->kn->id` on a v1
/// host (selected when `fs_magic` is not the v2 magic), or
/// `task->cgroups->dfl_cgrp->kn->id` on a v2 host.
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

fn current_tid() -> u32 { (unsafe { bpf_get_current_pid_tgid() } & 0xFFFF_FFFF) as u32 }

fn mount_key(inode: u64, mount: &[u8]) -> VfsKey {
    let mut buf = [0u8; MOUNT_LEN];
    let len = mount.len().min(MOUNT_LEN);
    buf[..len].copy_from_slice(&mount[..len]);
    VfsKey {
        cgroup_inode: inode,
        mount: buf,
    }
}

fn add_bytes(map: &HashMap<VfsKey, ByteCounter>, key: VfsKey, bytes: u64, error: bool) {
    unsafe {
        match map.get_ptr_mut(&key) {
            Some(entry) => {
                let entry = &mut *entry;
                entry.bytes += bytes;
                entry.calls += 1;
                if error {
                    entry.errors += 1;
                }
            },
            None => {
                let _ = map.insert(
                    &key,
                    &ByteCounter {
                        bytes,
                        calls: 1,
                        errors: u64::from(error),
                    },
                    0,
                );
            },
        }
    }
}

fn add_call(map: &HashMap<CgroupKey, CallCounter>, key: CgroupKey, error: bool) {
    unsafe {
        match map.get_ptr_mut(&key) {
            Some(entry) => {
                let entry = &mut *entry;
                entry.calls += 1;
                if error {
                    entry.errors += 1;
                }
            },
            None => {
                let _ = map.insert(
                    &key,
                    &CallCounter {
                        calls: 1,
                        errors: u64::from(error),
                    },
                    0,
                );
            },
        }
    }
}

#[kprobe]
pub fn kprobe_vfs_write(ctx: ProbeContext) -> u32 {
    let _ = &ctx;
    try_vfs_entry().unwrap_or(0)
}

#[kprobe]
pub fn kprobe_vfs_read(ctx: ProbeContext) -> u32 {
    let _ = &ctx;
    try_vfs_entry().unwrap_or(0)
}

/// Stashes the calling thread's cgroup inode so the matching kretprobe
/// can attribute the call without re-walking `task_struct`; the actual
/// byte count is only known once the call returns.
fn try_vfs_entry() -> Option<u32> {
    let inode = current_cgroup_inode()?;
    let _ = PENDING_VFS_CALL.insert(&current_tid(), &inode, 0);
    Some(0)
}

#[kretprobe]
pub fn kretprobe_vfs_write(ctx: RetProbeContext) -> u32 {
    try_vfs_ret(&ctx, &WRITE_ACCUMULATOR).unwrap_or(0)
}

#[kretprobe]
pub fn kretprobe_vfs_read(ctx: RetProbeContext) -> u32 {
    try_vfs_ret(&ctx, &READ_ACCUMULATOR).unwrap_or(0)
}

/// `vfs_write`/`vfs_read` return the number of bytes actually
/// transferred, or a negative errno on failure; this is the only point
/// at which the real byte count is known, so the entry kprobe above
/// never touches the accumulator itself.
fn try_vfs_ret(ctx: &RetProbeContext, map: &HashMap<VfsKey, ByteCounter>) -> Option<u32> {
    let tid = current_tid();
    let inode = unsafe { PENDING_VFS_CALL.get(&tid) }.copied()?;
    let _ = PENDING_VFS_CALL.remove(&tid);

    let ret: i64 = ctx.ret().unwrap_or(0);
    if ret < 0 {
        add_bytes(map, mount_key(inode, b""), 0, true);
    } else {
        add_bytes(map, mount_key(inode, b""), ret as u64, false);
    }
    Some(0)
}

#[kprobe]
pub fn kprobe_vfs_open(ctx: ProbeContext) -> u32 {
    let _ = &ctx;
    match current_cgroup_inode() {
        Some(inode) => {
            add_call(&OPEN_ACCUMULATOR, CgroupKey { cgroup_inode: inode }, false);
            0
        },
        None => 0,
    }
}

#[kprobe]
pub fn kprobe_vfs_create(ctx: ProbeContext) -> u32 {
    let _ = &ctx;
    match current_cgroup_inode() {
        Some(inode) => {
            add_call(&CREATE_ACCUMULATOR, CgroupKey { cgroup_inode: inode }, false);
            0
        },
        None => 0,
    }
}

#[kprobe]
pub fn kprobe_vfs_unlink(ctx: ProbeContext) -> u32 {
    let _ = &ctx;
    match current_cgroup_inode() {
        Some(inode) => {
            add_call(&UNLINK_ACCUMULATOR, CgroupKey { cgroup_inode: inode }, false);
            0
        },
        None => 0,
    }
}

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}

// Touches map_names so the constants stay linked to this binary's debug
// info even though map lookups above go through the typed statics.
const _: &str = map_names::CONFIG;
