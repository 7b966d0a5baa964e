use std::path::PathBuf;
use std::process::Command;

use anyhow::{bail, Context, Result};
use clap::Parser;

#[derive(Parser)]
enum Cli {
    /// Build the eBPF VFS/network probe objects
    BuildEbpf {
        #[clap(default_value = "bpfel-unknown-none", long)]
        target: String,
        #[clap(long)]
        release: bool,
    },
    /// Build the eBPF objects and then the userspace daemon
    Build {
        #[clap(long)]
        release: bool,
    },
}

fn main() -> Result<()> {
    match Cli::parse() {
        Cli::BuildEbpf { target, release } => build_ebpf(&target, release),
        Cli::Build { release } => {
            build_ebpf("bpfel-unknown-none", release)?;
            build_userspace(release)
        },
    }
}

fn build_ebpf(target: &str, release: bool) -> Result<()> {
    let ebpf_dir = workspace_root().join("jobmetrics-ebpf");

    // eBPF objects must be built in release mode: debug builds pull in
    // core::fmt machinery that exceeds the BPF verifier's instruction and
    // argument-count limits.
    let mut cmd = Command::new("cargo");
    cmd.current_dir(&ebpf_dir)
        .env_remove("RUSTUP_TOOLCHAIN")
        .args(["build", "--target", target, "-Z", "build-std=core"]);
    if release || true {
        cmd.arg("--release");
    }
    cmd.env(
        "CARGO_ENCODED_RUSTFLAGS",
        ["-Cdebuginfo=2", "-Clink-arg=--btf"].join("\x1f"),
    );

    let status = cmd.status().context("failed to build eBPF objects")?;
    if !status.success() {
        bail!("eBPF build failed with status: {status}");
    }
    Ok(())
}

fn build_userspace(release: bool) -> Result<()> {
    let mut cmd = Command::new("cargo");
    cmd.current_dir(workspace_root())
        .args(["build", "--package", "jobmetrics"]);
    if release {
        cmd.arg("--release");
    }
    let status = cmd.status().context("failed to build jobmetricsd")?;
    if !status.success() {
        bail!("userspace build failed with status: {status}");
    }
    Ok(())
}

fn workspace_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .to_path_buf()
}
