//! Second GPU ordinal resolution strategy: read process environments
//! (under a security context) for SLURM's GPU assignment variables.

use std::collections::HashMap;

/// Parses a comma-separated list of small integers, as both
/// `SLURM_STEP_GPUS` and `SLURM_JOB_GPUS` use (`"0,1,2"`).
fn parse_index_list(raw: &str) -> Vec<u32> { raw.split(',').filter_map(|s| s.trim().parse().ok()).collect() }

/// Finds the GPU index list for `uuid` among the given process
/// environments. A process belongs to the unit when `SLURM_JOB_ID`
/// equals `uuid`. When both `SLURM_STEP_GPUS` and `SLURM_JOB_GPUS` are
/// present, `SLURM_JOB_GPUS` wins: a known upstream bug causes
/// `SLURM_STEP_GPUS` to misreport the assignment once both are set.
#[must_use]
pub fn resolve(uuid: &str, environs: &[HashMap<String, String>]) -> Vec<u32> {
    for environ in environs {
        let Some(job_id) = environ.get("SLURM_JOB_ID") else { continue };
        if job_id != uuid {
            continue;
        }
        if let Some(raw) = environ.get("SLURM_JOB_GPUS") {
            return parse_index_list(raw);
        }
        if let Some(raw) = environ.get("SLURM_STEP_GPUS") {
            return parse_index_list(raw);
        }
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect()
    }

    #[test]
    fn prefers_job_gpus_over_step_gpus_when_both_present() {
        let environs = vec![env(&[("SLURM_JOB_ID", "job-1"), ("SLURM_STEP_GPUS", "0"), ("SLURM_JOB_GPUS", "0,1")])];
        assert_eq!(resolve("job-1", &environs), vec![0, 1]);
    }

    #[test]
    fn falls_back_to_step_gpus_when_job_gpus_absent() {
        let environs = vec![env(&[("SLURM_JOB_ID", "job-1"), ("SLURM_STEP_GPUS", "2,3")])];
        assert_eq!(resolve("job-1", &environs), vec![2, 3]);
    }

    #[test]
    fn no_match_for_unrelated_job_id() {
        let environs = vec![env(&[("SLURM_JOB_ID", "job-2"), ("SLURM_JOB_GPUS", "0")])];
        assert!(resolve("job-1", &environs).is_empty());
    }
}
