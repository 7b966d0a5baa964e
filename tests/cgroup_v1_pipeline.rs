//! End-to-end discovery + counter-read pipeline against a synthetic
//! cgroup v1 (legacy, per-controller) filesystem tree.

use std::fs;
use std::path::Path;

use jobmetrics::cgroup;
use jobmetrics::model::{CgroupMode, Manager};
use jobmetrics::shell::Shell;

fn quiet_shell() -> Shell { Shell::from_write(Box::new(std::io::sink()), Box::new(std::io::sink())) }

fn write(path: &Path, contents: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

#[test]
fn slurm_job_counters_round_trip_across_controller_subtrees() {
    let root = tempfile::tempdir().unwrap();

    let cpuacct_job = root.path().join("cpuacct/slurm/job_1009249");
    write(&cpuacct_job.join("tasks"), "201\n202\n");
    write(&cpuacct_job.join("cpuacct.usage"), "2500000000\n");
    write(&cpuacct_job.join("cpuacct.stat"), "user 200\nsystem 50\n");

    let memory_job = root.path().join("memory/slurm/job_1009249");
    write(&memory_job.join("tasks"), "201\n202\n");
    write(&memory_job.join("memory.stat"), "total_rss 104857600\ntotal_cache 52428800\n");
    write(&memory_job.join("memory.usage_in_bytes"), "157286400\n");
    write(&memory_job.join("memory.limit_in_bytes"), "9223372036854771712\n");
    write(&memory_job.join("memory.failcnt"), "0\n");

    let blkio_job = root.path().join("blkio/slurm/job_1009249");
    write(&blkio_job.join("tasks"), "201\n202\n");
    write(
        &blkio_job.join("blkio.throttle.io_service_bytes"),
        "253:0 Read 1024\n253:0 Write 2048\n253:0 Total 3072\n",
    );
    write(
        &blkio_job.join("blkio.throttle.io_serviced"),
        "253:0 Read 4\n253:0 Write 8\n253:0 Total 12\n",
    );

    let shell = quiet_shell();
    let mode = CgroupMode::Legacy("cpuacct".to_owned());
    let units = cgroup::discover(root.path(), Manager::Slurm, &mode, &shell);
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].uuid, "1009249");
    assert_eq!(units[0].processes.len(), 2);

    let metrics = cgroup::counter::read_all(&units, &mode, &shell);
    assert_eq!(metrics.len(), 1);
    let metric = &metrics[0];
    assert_eq!(metric.cpu_total_seconds, 2.5);
    assert_eq!(metric.memory_rss_bytes, 104_857_600.0);
    assert_eq!(metric.memory_used_bytes, 157_286_400.0);

    let io = metric.blkio.get("253:0").unwrap();
    assert_eq!(io.read_bytes, 1024.0);
    assert_eq!(io.write_bytes, 2048.0);
    assert_eq!(io.read_reqs, 4.0);
    assert_eq!(io.write_reqs, 8.0);
}
