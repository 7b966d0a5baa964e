//! Raw `perf_event_open(2)` bindings. The upstream crate this component
//! is grounded on generates `perf_event_attr` via bindgen against the
//! kernel UAPI header; the profiler only ever needs scalar hardware /
//! software / cache events read in aggregate-group mode, so the ABI
//! surface it actually touches is hand-written here instead of pulling
//! in a full UAPI binding crate.

use std::io;
use std::mem;
use std::os::unix::io::RawFd;

/// `perf_event_attr.type`, from `linux/perf_event.h`.
#[repr(u32)]
#[derive(Debug, Clone, Copy)]
pub enum PerfType {
    Hardware = 0,
    Software = 1,
    HwCache = 3,
}

/// Bits of `perf_event_attr.read_format` this profiler always requests:
/// the raw value plus the two multiplexing-scaling fields.
pub const READ_FORMAT_TOTAL_TIME_ENABLED: u64 = 1 << 0;
pub const READ_FORMAT_TOTAL_TIME_RUNNING: u64 = 1 << 1;

/// Mirrors `struct perf_event_attr` from `linux/perf_event.h`, trimmed to
/// the fields this profiler sets. Fields after `config` keep the
/// kernel's packed bitfield layout via a single `u64` of flags.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PerfEventAttr {
    pub perf_type: u32,
    pub size: u32,
    pub config: u64,
    pub sample_period_or_freq: u64,
    pub sample_type: u64,
    pub read_format: u64,
    pub flags: u64,
    pub wakeup_events_or_watermark: u32,
    pub bp_type: u32,
    pub config1_or_bp_addr: u64,
    pub config2_or_bp_len: u64,
    pub branch_sample_type: u64,
    pub sample_regs_user: u64,
    pub sample_stack_user: u32,
    pub clockid: i32,
    pub sample_regs_intr: u64,
    pub aux_watermark: u32,
    pub sample_max_stack: u16,
    pub reserved_2: u16,
}

/// `disabled` bit of the `flags` field: the event is created stopped so
/// that opening it for many processes in a burst doesn't briefly count
/// for any of them before the profiler is ready.
const FLAG_DISABLED: u64 = 1 << 0;
/// `inherit` bit: child threads/processes of the target pid inherit the
/// counter, which matters for multi-threaded jobs.
const FLAG_INHERIT: u64 = 1 << 1;

impl PerfEventAttr {
    #[must_use]
    pub fn new(perf_type: PerfType, config: u64) -> Self {
        let mut attr: Self = unsafe { mem::zeroed() };
        attr.perf_type = perf_type as u32;
        attr.size = mem::size_of::<Self>() as u32;
        attr.config = config;
        attr.read_format = READ_FORMAT_TOTAL_TIME_ENABLED | READ_FORMAT_TOTAL_TIME_RUNNING;
        attr.flags = FLAG_DISABLED | FLAG_INHERIT;
        attr
    }
}

/// `ioctl(2)` request codes for starting/stopping a perf event fd.
const PERF_EVENT_IOC_ENABLE: libc::c_ulong = 0x2400;
const PERF_EVENT_IOC_DISABLE: libc::c_ulong = 0x2401;

/// Opens one perf event for `pid` on all cpus (`cpu = -1`), in its own
/// group (`group_fd = -1`: every event this profiler opens is read
/// independently, never as a grouped set, since scaling is already
/// carried per-event via `read_format`).
pub fn perf_event_open(attr: &PerfEventAttr, pid: libc::pid_t) -> io::Result<RawFd> {
    let flags = libc::PERF_FLAG_FD_CLOEXEC;
    let fd = unsafe {
        libc::syscall(
            libc::SYS_perf_event_open,
            attr as *const PerfEventAttr,
            pid,
            -1i32,
            -1i32,
            flags,
        )
    };
    if fd < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(fd as RawFd)
    }
}

pub fn enable(fd: RawFd) -> io::Result<()> { ioctl_no_arg(fd, PERF_EVENT_IOC_ENABLE) }

pub fn disable(fd: RawFd) -> io::Result<()> { ioctl_no_arg(fd, PERF_EVENT_IOC_DISABLE) }

fn ioctl_no_arg(fd: RawFd, request: libc::c_ulong) -> io::Result<()> {
    let rc = unsafe { libc::ioctl(fd, request, 0) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Reads `{value, time_enabled, time_running}` via a single blocking
/// `read(2)`, per the `PERF_FORMAT_TOTAL_TIME_ENABLED|RUNNING` layout.
pub fn read_counter(fd: RawFd) -> io::Result<(u64, u64, u64)> {
    let mut buf = [0u64; 3];
    let rc = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), mem::size_of_val(&buf)) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok((buf[0], buf[1], buf[2]))
}

pub fn close(fd: RawFd) { unsafe { libc::close(fd) }; }
