use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::model::Manager;
use crate::shell;

const DEFAULT_SCRAPE_INTERVAL_MS: u64 = 15_000;
const DEFAULT_SCRAPE_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Compute-unit attribution daemon: attributes CPU, memory, I/O, RDMA,
/// GPU and perf-counter usage on a node to the SLURM job, libvirt VM or
/// Kubernetes pod responsible for it.
#[derive(Parser)]
#[clap(name = "jobmetricsd", version, author)]
pub struct Opts {
    #[clap(flatten)]
    pub shell: shell::Options,

    /// Resource managers to discover compute units for. May be repeated.
    #[clap(long = "manager", value_enum, default_values_t = [ManagerArg::Slurm])]
    pub managers: Vec<ManagerArg>,

    /// Cgroup filesystem mount root
    #[clap(long, default_value = DEFAULT_CGROUP_ROOT)]
    pub cgroup_root: PathBuf,

    /// Force a specific cgroup API version instead of auto-detecting.
    /// Intended for tests against a synthetic cgroupfs tree.
    #[clap(long, value_enum)]
    pub force_cgroup_mode: Option<CgroupModeArg>,

    /// Interval between scrapes, e.g. "15s"
    #[clap(long, value_parser = humantime::parse_duration, default_value = "15s")]
    pub scrape_interval: Duration,

    /// Per-scrape deadline across all sub-collectors
    #[clap(long, value_parser = humantime::parse_duration, default_value = "10s")]
    pub scrape_timeout: Duration,

    /// Disable the perf hardware/software/cache counter profiler
    #[clap(long)]
    pub no_perf: bool,

    /// Only profile processes whose environment contains one of these
    /// variable names (requires a privileged environ read)
    #[clap(long = "perf-target-env")]
    pub perf_target_env: Vec<String>,

    /// Disable the eBPF VFS/network accounting collector
    #[clap(long)]
    pub no_ebpf: bool,

    /// Restrict VFS accounting to mount points containing one of these
    /// substrings. Empty means all mount points.
    #[clap(long = "ebpf-vfs-mount")]
    pub ebpf_vfs_mounts: Vec<String>,

    /// Disable the RDMA collector
    #[clap(long)]
    pub no_rdma: bool,

    /// Path to the host's rdma control tool
    #[clap(long, default_value = "rdma")]
    pub rdma_tool: String,

    /// Disable the GPU ordinal resolver
    #[clap(long)]
    pub no_gpu: bool,

    /// Directory of per-index prolog files mapping a GPU index to the
    /// uuid of the unit it is assigned to
    #[clap(long)]
    pub gpu_prolog_map_dir: Option<PathBuf>,

    /// Optional file mapping slurm-internal GPU index to vendor-tool
    /// index (and MIG GPU-instance id), one `slurm_index vendor_index[.gi]`
    /// pair per line
    #[clap(long)]
    pub gpu_reindex_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ManagerArg {
    Slurm,
    Libvirt,
    K8s,
}

impl From<ManagerArg> for Manager {
    fn from(value: ManagerArg) -> Self {
        match value {
            ManagerArg::Slurm => Self::Slurm,
            ManagerArg::Libvirt => Self::Libvirt,
            ManagerArg::K8s => Self::K8s,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CgroupModeArg {
    V1,
    V2,
}

/// Resolved configuration, with every value defaulted and every path
/// canonicalized input validated. Built once at startup from [`Opts`].
pub struct Config {
    pub hostname: String,
    pub managers: Vec<Manager>,
    pub cgroup_root: PathBuf,
    pub force_cgroup_mode: Option<CgroupModeArg>,
    pub scrape_interval: Duration,
    pub scrape_timeout: Duration,

    pub perf_enabled: bool,
    pub perf_target_env: Vec<String>,

    pub ebpf_enabled: bool,
    pub ebpf_vfs_mounts: Vec<String>,

    pub rdma_enabled: bool,
    pub rdma_tool: String,

    pub gpu_enabled: bool,
    pub gpu_prolog_map_dir: Option<PathBuf>,
    pub gpu_reindex_file: Option<PathBuf>,
}

impl Config {
    #[must_use]
    pub fn from_opts(opts: &Opts) -> Self {
        let hostname = gethostname::gethostname()
            .into_string()
            .unwrap_or_else(|_| "unknown".to_owned());

        Self {
            hostname,
            managers: opts.managers.iter().copied().map(Manager::from).collect(),
            cgroup_root: opts.cgroup_root.clone(),
            force_cgroup_mode: opts.force_cgroup_mode,
            scrape_interval: opts.scrape_interval,
            scrape_timeout: opts.scrape_timeout,
            perf_enabled: !opts.no_perf,
            perf_target_env: opts.perf_target_env.clone(),
            ebpf_enabled: !opts.no_ebpf,
            ebpf_vfs_mounts: opts.ebpf_vfs_mounts.clone(),
            rdma_enabled: !opts.no_rdma,
            rdma_tool: opts.rdma_tool.clone(),
            gpu_enabled: !opts.no_gpu,
            gpu_prolog_map_dir: opts.gpu_prolog_map_dir.clone(),
            gpu_reindex_file: opts.gpu_reindex_file.clone(),
        }
    }
}

/// Parses CLI arguments and resolves defaults. Displays help/version and
/// exits the process on request, per clap's standard behavior.
#[must_use]
pub fn load() -> (Opts, Config) {
    let opts = Opts::parse();
    let config = Config::from_opts(&opts);
    (opts, config)
}
