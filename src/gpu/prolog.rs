//! First GPU ordinal resolution strategy: a prolog script (run by the
//! resource manager before the job starts) writes one file per GPU
//! index under a configured directory, containing the uuid of the unit
//! that owns it.

use std::fs;
use std::path::Path;

/// Reads the prolog file for `global_index` and compares its contents
/// (trimmed) against `uuid`. Absence of the file, or any read error, is
/// treated as "not assigned" rather than an error: most indices on a
/// node are unassigned at any given time.
#[must_use]
pub fn owns(prolog_dir: &Path, global_index: u32, uuid: &str) -> bool {
    let path = prolog_dir.join(global_index.to_string());
    match fs::read_to_string(&path) {
        Ok(contents) => contents.trim() == uuid,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_trimmed_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("0"), "job-42\n").unwrap();
        assert!(owns(dir.path(), 0, "job-42"));
        assert!(!owns(dir.path(), 0, "job-43"));
    }

    #[test]
    fn missing_file_is_not_owned() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!owns(dir.path(), 7, "job-42"));
    }
}
