//! End-to-end discovery + counter-read pipeline against a synthetic
//! cgroup v2 filesystem tree, covering all three resource managers.

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
fn slurm_job_counters_round_trip_through_discovery_and_read() {
    let root = tempfile::tempdir().unwrap();
    let job_dir = root.path().join("system.slice/slurmstepd.scope/job_1009249");
    let step_dir = job_dir.join("step_0");

    write(&job_dir.join("cgroup.procs"), "");
    write(&step_dir.join("cgroup.procs"), "201\n202\n");
    write(&job_dir.join("cpu.stat"), "usage_usec 2500000\nuser_usec 2000000\nsystem_usec 500000\n");
    write(&job_dir.join("memory.stat"), "anon 104857600\nfile 52428800\n");
    write(&job_dir.join("memory.current"), "157286400\n");
    write(&job_dir.join("memory.max"), "max\n");
    write(&job_dir.join("memory.events"), "oom 0\nmax 3\n");
    write(&job_dir.join("io.stat"), "253:0 rbytes=1024 wbytes=2048 rios=4 wios=8\n");
    write(&job_dir.join("cpuset.cpus.effective"), "0-3\n");

    let shell = quiet_shell();
    let mode = CgroupMode::Unified;
    let units = cgroup::discover(root.path(), Manager::Slurm, &mode, &shell);
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].uuid, "1009249");
    assert_eq!(units[0].processes.len(), 2);

    let metrics = cgroup::counter::read_all(&units, &mode, &shell);
    assert_eq!(metrics.len(), 1);
    let metric = &metrics[0];
    assert!(!metric.err);
    assert_eq!(metric.cpu_total_seconds, 2.5);
    assert_eq!(metric.cpu_user_seconds, 2.0);
    assert_eq!(metric.cpu_system_seconds, 0.5);
    assert_eq!(metric.memory_rss_bytes, 104_857_600.0);
    assert_eq!(metric.memory_used_bytes, 157_286_400.0);
    // "max" substitutes total host memory, which is always > 0 on any
    // host this test runs on.
    assert!(metric.memory_total_bytes > 0.0);
    assert_eq!(metric.memory_fail_count, 0.0);
    assert_eq!(metric.cpus, 4.0);

    let io = metric.blkio.get("253:0").unwrap();
    assert_eq!(io.read_bytes, 1024.0);
    assert_eq!(io.write_reqs, 8.0);
}

#[test]
fn libvirt_and_k8s_units_are_discovered_independently() {
    let root = tempfile::tempdir().unwrap();

    let vm_dir = root.path().join("machine.slice/machine-qemu--1--instance-00000042.scope");
    write(&vm_dir.join("cgroup.procs"), "501\n");
    write(&vm_dir.join("cpu.stat"), "usage_usec 100\nuser_usec 60\nsystem_usec 40\n");

    let pod_dir = root
        .path()
        .join("kubepods/burstable/pod9d785bf1-5730-49a9-bb5a-a65531a71f65/container1");
    write(&pod_dir.join("cgroup.procs"), "601\n");
    write(&pod_dir.join("cpu.stat"), "usage_usec 200\nuser_usec 150\nsystem_usec 50\n");

    let shell = quiet_shell();
    let mode = CgroupMode::Unified;

    let vms = cgroup::discover(root.path(), Manager::Libvirt, &mode, &shell);
    assert_eq!(vms.len(), 1);
    assert_eq!(vms[0].uuid, "instance-00000042");

    let pods = cgroup::discover(root.path(), Manager::K8s, &mode, &shell);
    assert_eq!(pods.len(), 1);
    assert_eq!(pods[0].uuid, "9d785bf1-5730-49a9-bb5a-a65531a71f65");
}

#[test]
fn missing_counter_files_set_the_error_flag_without_panicking() {
    let root = tempfile::tempdir().unwrap();
    let job_dir = root.path().join("system.slice/slurmstepd.scope/job_1");
    write(&job_dir.join("cgroup.procs"), "11\n");

    let shell = quiet_shell();
    let mode = CgroupMode::Unified;
    let units = cgroup::discover(root.path(), Manager::Slurm, &mode, &shell);
    let metrics = cgroup::counter::read_all(&units, &mode, &shell);

    assert_eq!(metrics.len(), 1);
    assert!(metrics[0].err);
}
