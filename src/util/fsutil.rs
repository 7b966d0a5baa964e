//! Filesystem helpers used by cgroup discovery: inode lookups and
//! relative-path arithmetic against a cgroupfs mount root.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

/// Stats a path, returning its inode number. Used to key eBPF accumulator
/// lookups and to detect when a cgroup directory has been replaced (same
/// path, new inode means a new cgroup instance) between two scrapes.
#[must_use]
pub fn inode_of(path: &Path) -> Option<u64> { fs::metadata(path).ok().map(|m| m.ino()) }

/// Returns the filesystem magic number backing `path`, via `statfs(2)`.
/// Used to tell a cgroup v2 unified hierarchy (`CGROUP2_SUPER_MAGIC`)
/// apart from a v1 `cgroup` mount, and is passed through to the eBPF
/// config map so in-kernel code can validate `task->cgroups->dfl_cgrp`.
#[must_use]
pub fn filesystem_magic(path: &Path) -> Option<i64> {
    let c_path = std::ffi::CString::new(path.as_os_str().as_encoded_bytes()).ok()?;
    let mut stat: libc::statfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return None;
    }
    Some(stat.f_type as i64)
}

/// Strips `root` off the front of `path`, returning the cgroup's path
/// relative to the controller mount. This relative path is the stable
/// identifier a compute unit's cgroup keeps across a job's lifetime, even
/// though its absolute path and inode can change if the controller is
/// remounted.
#[must_use]
pub fn relative_to(root: &Path, path: &Path) -> Option<PathBuf> {
    path.strip_prefix(root).ok().map(Path::to_path_buf)
}

/// Lists the immediate child directories of `path`, silently skipping
/// anything that disappears mid-walk (cgroups are removed concurrently
/// with discovery as jobs exit).
#[must_use]
pub fn subdirectories(path: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(path) else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter(|entry| entry.file_type().is_ok_and(|ft| ft.is_dir()))
        .map(|entry| entry.path())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_to_strips_root() {
        let root = Path::new("/sys/fs/cgroup/cpuacct");
        let path = Path::new("/sys/fs/cgroup/cpuacct/slurm/uid_1000/job_42");
        assert_eq!(
            relative_to(root, path),
            Some(PathBuf::from("slurm/uid_1000/job_42"))
        );
    }

    #[test]
    fn relative_to_rejects_unrelated_path() {
        let root = Path::new("/sys/fs/cgroup/cpuacct");
        let path = Path::new("/sys/fs/cgroup/memory/slurm/job_42");
        assert_eq!(relative_to(root, path), None);
    }

    #[test]
    fn subdirectories_of_missing_path_is_empty() {
        assert!(subdirectories(Path::new("/nonexistent/does/not/exist")).is_empty());
    }
}
