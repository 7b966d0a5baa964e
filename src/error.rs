//! Per-component error types. Each sub-collector has its own `thiserror`
//! enum so callers can match on a specific failure mode; the orchestrator
//! treats a sub-collector's startup failure as fatal for just that
//! sub-collector rather than for the whole daemon.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to read cgroup directory {path}: {source}")]
    ReadDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to stat cgroup directory {path}: {source}")]
    Stat {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cgroup path {0:?} matched the unit regex but captured an empty uuid")]
    EmptyUuid(String),
    #[error("could not determine cgroup mode (v1/v2)")]
    UnknownMode,
}

#[derive(Debug, Error)]
pub enum CounterReadError {
    #[error("failed to read {file}: {source}")]
    Read {
        file: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {file}: {reason}")]
    Parse { file: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ProfilerError {
    #[error("perf_event_open failed for pid {pid}, event {event}: {source}")]
    OpenFailed {
        pid: u32,
        event: String,
        #[source]
        source: std::io::Error,
    },
    #[error("perf_event_open is not permitted for event family {0}")]
    PermissionDenied(String),
    #[error("read(2) on perf fd for pid {pid} failed: {source}")]
    ReadFailed {
        pid: u32,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum EbpfError {
    #[error("no eBPF object embedded for kernel version {0}.{1}")]
    NoObjectForKernel(u32, u32),
    #[error("failed to load eBPF object: {0}")]
    Load(String),
    #[error("failed to attach program {program}: {source}")]
    Attach {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read map {0}: {1}")]
    MapRead(String, String),
}

#[derive(Debug, Error)]
pub enum RdmaError {
    #[error("failed to exec rdma tool: {0}")]
    Exec(String),
    #[error("failed to parse rdma tool output: {0}")]
    Parse(String),
    #[error("failed to toggle per-PID QP counters on link {0}: {1}")]
    ToggleFailed(String, String),
}

#[derive(Debug, Error)]
pub enum GpuResolveError {
    #[error("failed to read GPU prolog map directory {0}: {1}")]
    PrologMapRead(String, String),
    #[error("NVML call failed: {0}")]
    Nvml(String),
    #[error("reindex table entry {0:?} is malformed")]
    MalformedReindex(String),
}

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("failed to raise capability {0:?}: {1}")]
    Raise(caps::Capability, String),
    #[error("failed to lower capability {0:?}: {1}")]
    Lower(caps::Capability, String),
}
