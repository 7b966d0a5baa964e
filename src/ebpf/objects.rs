//! Embeds the compiled eBPF objects and, for the network object, picks
//! which attach-point variant (kprobe vs fentry/fexit) to use by kernel
//! version band. Both objects are CO-RE relocated, so a single ELF
//! covers every supported kernel.

use crate::util;

pub static VFS_OBJECT: &[u8] =
    aya::include_bytes_aligned!("../../jobmetrics-ebpf/target/bpfel-unknown-none/release/vfs");
pub static NET_OBJECT: &[u8] =
    aya::include_bytes_aligned!("../../jobmetrics-ebpf/target/bpfel-unknown-none/release/net");

/// Which attach-point family to use for a probe set, resolved once at
/// startup from the running kernel version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachKind {
    Kprobe,
    Fentry,
}

/// Whether the VFS accumulator object has any attachable program for
/// `kernel`. Unlike the network object, the VFS probe set only ships
/// kprobe/kretprobe programs (see `jobmetrics-ebpf/src/vfs.rs`) — there
/// is no fentry/fexit variant — so this is a floor check rather than a
/// kind selection; the 5.11 floor is this collector's supported minimum.
#[must_use]
pub fn vfs_supported(kernel: (u32, u32)) -> bool { kernel >= (5, 11) }

/// Network probes gain reliable fentry/fexit coverage from 6.5; the
/// floor this collector supports is 5.19.
#[must_use]
pub fn net_attach_kind(kernel: (u32, u32)) -> Option<AttachKind> {
    if kernel < (5, 19) {
        return None;
    }
    Some(if kernel >= (6, 5) { AttachKind::Fentry } else { AttachKind::Kprobe })
}

#[must_use]
pub fn running_kernel() -> (u32, u32) { util::kernel_version().unwrap_or((0, 0)) }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vfs_supported_floor() {
        assert!(!vfs_supported((5, 4)));
        assert!(vfs_supported((5, 11)));
        assert!(vfs_supported((6, 8)));
    }

    #[test]
    fn net_attach_kind_bands() {
        assert_eq!(net_attach_kind((5, 10)), None);
        assert_eq!(net_attach_kind((6, 0)), Some(AttachKind::Kprobe));
        assert_eq!(net_attach_kind((6, 5)), Some(AttachKind::Fentry));
    }
}
