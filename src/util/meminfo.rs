//! Host-wide memory accounting, parsed from `/proc/meminfo`.
//!
//! The cgroup v2 counter reader substitutes this value whenever a limit
//! file reads back the literal `"max"` sentinel, so that a job with no
//! explicit memory cap reports a finite (if uninteresting) limit instead
//! of an unrepresentable one.

use std::fs;

/// Reads `MemTotal` out of `/proc/meminfo`, in bytes.
#[must_use]
pub fn total_memory_bytes() -> Option<u64> {
    let contents = fs::read_to_string("/proc/meminfo").ok()?;
    parse_mem_total(&contents)
}

fn parse_mem_total(contents: &str) -> Option<u64> {
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            let kb: u64 = rest.split_whitespace().next()?.parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mem_total() {
        let sample = "MemTotal:       32859212 kB\nMemFree:        12345678 kB\n";
        assert_eq!(parse_mem_total(sample), Some(32_859_212 * 1024));
    }

    #[test]
    fn missing_field_is_none() {
        assert_eq!(parse_mem_total("MemFree: 123 kB\n"), None);
    }
}
