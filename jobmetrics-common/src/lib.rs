#![cfg_attr(not(feature = "userspace"), no_std)]

//! Types shared between the eBPF VFS/network accumulator programs
//! (`jobmetrics-ebpf`) and the userspace reader (`jobmetrics::ebpf`).
//!
//! Every type here is `#[repr(C)]` and plain-old-data so that it can be
//! copied byte-for-byte between a BPF map entry and userspace without
//! any serialization step.

/// Maximum length of a mount-point string stored in [`VfsKey`].
pub const MOUNT_LEN: usize = 64;

/// Key for the VFS byte/call accumulators (`write_accumulator`,
/// `read_accumulator`).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct VfsKey {
    pub cgroup_inode: u64,
    pub mount: [u8; MOUNT_LEN],
}

/// Key for the VFS call-only accumulators (`open_accumulator`,
/// `create_accumulator`, `unlink_accumulator`).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct CgroupKey {
    pub cgroup_inode: u64,
}

/// Key for the network accumulators (`ingress_accumulator`,
/// `egress_accumulator`, `retrans_accumulator`).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct NetKey {
    pub cgroup_inode: u64,
    pub proto: u16,
    pub family: u16,
}

/// Value for byte-counted accumulators: `{bytes, calls, errors}`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ByteCounter {
    pub bytes: u64,
    pub calls: u64,
    pub errors: u64,
}

/// Value for call-only accumulators: `{calls, errors}`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CallCounter {
    pub calls: u64,
    pub errors: u64,
}

/// Value for network accumulators: `{packets, bytes}`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PacketCounter {
    pub packets: u64,
    pub bytes: u64,
}

/// Single entry in the startup configuration map, populated once by
/// userspace before any probe fires.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BpfConfig {
    /// Index of the active v1 controller in the kernel's internal cgroup
    /// subsystem array, or 0 on the unified (v2) hierarchy.
    pub cgroup_subsys_idx: u32,
    /// `statfs(2)` magic number of the active cgroup filesystem, used by
    /// the probes to resolve a task's cgroup inode consistently across
    /// v1/v2.
    pub cgrp_fs_magic: u64,
}

#[cfg(feature = "userspace")]
mod pod_impls {
    use super::{BpfConfig, ByteCounter, CallCounter, CgroupKey, NetKey, PacketCounter, VfsKey};

    // Safety: every type above is `#[repr(C)]`, contains only integer
    // fields or a fixed-size byte array, and has no padding-sensitive
    // invariants, so reinterpreting raw BPF map bytes as these types is
    // sound.
    unsafe impl aya::Pod for VfsKey {}
    unsafe impl aya::Pod for CgroupKey {}
    unsafe impl aya::Pod for NetKey {}
    unsafe impl aya::Pod for ByteCounter {}
    unsafe impl aya::Pod for CallCounter {}
    unsafe impl aya::Pod for PacketCounter {}
    unsafe impl aya::Pod for BpfConfig {}
}

/// Names of the maps shared between the eBPF objects and the userspace
/// loader. Kept as constants so both sides stay in lockstep.
pub mod map_names {
    pub const CONFIG: &str = "CONFIG_MAP";
    pub const WRITE_ACCUMULATOR: &str = "write_accumulator";
    pub const READ_ACCUMULATOR: &str = "read_accumulator";
    pub const OPEN_ACCUMULATOR: &str = "open_accumulator";
    pub const CREATE_ACCUMULATOR: &str = "create_accumulator";
    pub const UNLINK_ACCUMULATOR: &str = "unlink_accumulator";
    pub const INGRESS_ACCUMULATOR: &str = "ingress_accumulator";
    pub const EGRESS_ACCUMULATOR: &str = "egress_accumulator";
    pub const RETRANS_ACCUMULATOR: &str = "retrans_accumulator";
}
