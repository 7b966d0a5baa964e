//! Parses the range-list syntax used by `cpuset.cpus`/`cpuset.cpus.effective`
//! (e.g. `"0-3,8,10-11"`), shared by both the v1 and v2 cgroup counter
//! readers.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CpusetError {
    #[error("empty cpuset file")]
    Empty,
    #[error("invalid cpuset range {0:?}")]
    InvalidRange(String),
    #[error("invalid cpuset index {0:?}")]
    InvalidIndex(String),
}

/// Parses a cpuset range-list string into the sorted list of cpu indices it
/// names. An empty (but present) file is an error, since a cgroup always
/// has at least one cpu assigned while it has live processes.
pub fn parse_cpuset(contents: &str) -> Result<Vec<u32>, CpusetError> {
    let trimmed = contents.trim();
    if trimmed.is_empty() {
        return Err(CpusetError::Empty);
    }

    let mut cpus = Vec::new();
    for part in trimmed.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match part.split_once('-') {
            Some((start, end)) => {
                let start: u32 = start
                    .parse()
                    .map_err(|_| CpusetError::InvalidRange(part.to_owned()))?;
                let end: u32 = end
                    .parse()
                    .map_err(|_| CpusetError::InvalidRange(part.to_owned()))?;
                if end < start {
                    return Err(CpusetError::InvalidRange(part.to_owned()));
                }
                cpus.extend(start..=end);
            },
            None => {
                let idx: u32 = part
                    .parse()
                    .map_err(|_| CpusetError::InvalidIndex(part.to_owned()))?;
                cpus.push(idx);
            },
        }
    }

    cpus.sort_unstable();
    cpus.dedup();
    Ok(cpus)
}

/// Number of cpus named by a cpuset range-list string; used for the
/// `cpus` field of `cgMetric` when only a count (not the exact set) is
/// needed.
pub fn cpuset_len(contents: &str) -> Result<usize, CpusetError> { parse_cpuset(contents).map(|v| v.len()) }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_ranges() {
        assert_eq!(parse_cpuset("0-3,6,8-10").unwrap(), vec![0, 1, 2, 3, 6, 8, 9, 10]);
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(parse_cpuset(""), Err(CpusetError::Empty));
        assert_eq!(parse_cpuset("   \n"), Err(CpusetError::Empty));
    }

    #[test]
    fn dedups_overlapping_ranges() {
        assert_eq!(parse_cpuset("0-2,1-3").unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn parses_single_index() {
        assert_eq!(parse_cpuset("4").unwrap(), vec![4]);
    }

    #[test]
    fn round_trips_idempotently() {
        let first = parse_cpuset("0-3,8,10-11").unwrap();
        let rebuilt: String = first
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let second = parse_cpuset(&rebuilt).unwrap();
        assert_eq!(first, second);
    }
}
