//! `/proc` access helpers: process listing, cmdline/environ reads, and the
//! two small parses needed to pick a cgroup v1 controller index and a BPF
//! object variant (`/proc/cgroups`, `/proc/version_signature`).

use std::collections::HashMap;
use std::fs;

/// Lists every pid currently visible under `/proc`.
pub fn list_pids() -> Vec<u32> {
    let mut pids = Vec::new();
    let Ok(entries) = fs::read_dir("/proc") else {
        return pids;
    };
    for entry in entries.flatten() {
        if let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() {
            pids.push(pid);
        }
    }
    pids
}

/// Reads `/proc/<pid>/cmdline`, joining the NUL-separated argv with spaces.
/// Returns `None` if the process has already exited.
#[must_use]
pub fn read_cmdline(pid: u32) -> Option<String> {
    let raw = fs::read(format!("/proc/{pid}/cmdline")).ok()?;
    let joined = raw
        .split(|&b| b == 0)
        .filter(|s| !s.is_empty())
        .map(String::from_utf8_lossy)
        .collect::<Vec<_>>()
        .join(" ");
    Some(joined)
}

/// Reads `/proc/<pid>/environ`, parsing it into a `KEY=VALUE` map.
///
/// This requires `CAP_SYS_PTRACE` and `CAP_DAC_READ_SEARCH` to read
/// another user's environment; callers invoke this from inside a
/// [`crate::security::SecurityContext`] that has raised those
/// capabilities for the duration of the call.
#[must_use]
pub fn read_environ(pid: u32) -> Option<HashMap<String, String>> {
    let raw = fs::read(format!("/proc/{pid}/environ")).ok()?;
    let mut map = HashMap::new();
    for entry in raw.split(|&b| b == 0).filter(|s| !s.is_empty()) {
        let entry = String::from_utf8_lossy(entry);
        if let Some((key, value)) = entry.split_once('=') {
            map.insert(key.to_owned(), value.to_owned());
        }
    }
    Some(map)
}

/// Resolves the index of the given controller name in the kernel's
/// internal cgroup subsystem array, by parsing `/proc/cgroups`. Used both
/// to pick which v1 subtree to read counters from and to populate the
/// eBPF `CONFIG_MAP` entry.
#[must_use]
pub fn cgroup_controller_index(name: &str) -> Option<u32> {
    let contents = fs::read_to_string("/proc/cgroups").ok()?;
    for (idx, line) in contents.lines().skip(1).enumerate() {
        let mut fields = line.split_whitespace();
        if fields.next() == Some(name) {
            return Some(idx as u32);
        }
    }
    None
}

/// Parses the running kernel version out of `/proc/version_signature`
/// (Debian/Ubuntu) or, if absent, `uname -r` via `/proc/sys/kernel/osrelease`.
/// Used to pick which of the three kernel-version-banded eBPF objects to
/// load for the VFS and network probe sets.
#[must_use]
pub fn kernel_version() -> Option<(u32, u32)> {
    let raw = fs::read_to_string("/proc/version_signature")
        .ok()
        .and_then(|s| s.split_whitespace().last().map(str::to_owned))
        .or_else(|| fs::read_to_string("/proc/sys/kernel/osrelease").ok())?;
    parse_kernel_version(raw.trim())
}

fn parse_kernel_version(raw: &str) -> Option<(u32, u32)> {
    let mut parts = raw.split(['.', '-']);
    let major: u32 = parts.next()?.parse().ok()?;
    let minor: u32 = parts.next()?.parse().ok()?;
    Some((major, minor))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kernel_version() {
        assert_eq!(parse_kernel_version("6.2.0-39-generic"), Some((6, 2)));
        assert_eq!(parse_kernel_version("5.11"), Some((5, 11)));
        assert_eq!(parse_kernel_version("garbage"), None);
    }

    #[test]
    fn current_process_cmdline_is_readable() {
        assert!(read_cmdline(std::process::id()).is_some());
    }
}
