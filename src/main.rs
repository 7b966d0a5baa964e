mod cgroup;
mod cli;
mod collector;
mod ebpf;
mod error;
mod gpu;
mod model;
mod perf;
mod rdma;
mod security;
mod shell;
mod sink;
mod timer;
mod util;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

use crate::collector::ComputeUnitCollector;
use crate::shell::Shell;
use crate::sink::{ChannelSink, Sample};
use crate::timer::{Stoppable, Timer};

/// Parses CLI args, starts every enabled sub-collector, and runs the
/// scrape loop until SIGINT/SIGTERM.
fn main() {
    human_panic::setup_panic!(human_panic::Metadata {
        name:     env!("CARGO_PKG_NAME").into(),
        version:  env!("CARGO_PKG_VERSION").into(),
        authors:  env!("CARGO_PKG_AUTHORS").into(),
        homepage: "https://github.com/hpc-tools/jobmetrics/issues/new".into(),
    });

    let (opts, config) = cli::load();
    let shell = Arc::new(Shell::new(&opts.shell));

    if !cfg!(target_os = "linux") {
        shell.error(
            "jobmetricsd only runs on Linux due to its reliance on cgroups, perf_event_open(2), and eBPF",
        );
        std::process::exit(1);
    }

    let config = Arc::new(config);
    let collector = match ComputeUnitCollector::new(Arc::clone(&config), Arc::clone(&shell)) {
        Ok(collector) => collector,
        Err(err) => {
            shell.error(format!("failed to start compute-unit collector: {err}"));
            std::process::exit(1);
        },
    };

    run(&config, &shell, &collector);
    collector.stop();
    shell.status("Exiting", "jobmetricsd");
}

/// Drives the scrape loop at `config.scrape_interval`, stopping when
/// SIGINT/SIGTERM is received. Each scrape is wrapped by a soft
/// `scrape_timeout` deadline: the orchestrator's sub-collectors use only
/// blocking I/O, so a breach is logged rather than cancelled.
fn run(config: &cli::Config, shell: &Arc<Shell>, collector: &ComputeUnitCollector) {
    let (timer, stop_handle) = Timer::new(config.scrape_interval);

    let stopped = Arc::new(AtomicBool::new(false));
    let stop_handle_c = stop_handle.clone();
    let stopped_c = Arc::clone(&stopped);
    let shell_c = Arc::clone(shell);
    ctrlc::set_handler(move || {
        if !stopped_c.swap(true, Ordering::SeqCst) {
            shell_c.status("Stopping", "received termination signal, draining in-flight scrape");
        }
        stop_handle_c.stop();
    })
    .expect("Error: could not install SIGINT/SIGTERM handler");

    shell.status(
        "Starting",
        format!("scrape loop, interval {:?}, timeout {:?}", config.scrape_interval, config.scrape_timeout),
    );

    for () in timer {
        let (sink, rx) = ChannelSink::new();
        for &manager in &config.managers {
            scrape_within_timeout(collector, manager, &sink, config.scrape_timeout, shell);
        }
        drop(sink);
        render(rx);
    }
}

/// Runs one manager's scrape, logging (but not cancelling) a deadline
/// breach: the sub-collectors' I/O is all blocking, so there is no safe
/// way to abandon a scrape mid-syscall without leaking the kernel
/// resources the shutdown contract promises to release.
fn scrape_within_timeout(
    collector: &ComputeUnitCollector,
    manager: model::Manager,
    sink: &ChannelSink,
    timeout: Duration,
    shell: &Shell,
) {
    std::thread::scope(|scope| {
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        scope.spawn(|| {
            collector.scrape(manager, sink);
            let _ = done_tx.send(());
        });
        if done_rx.recv_timeout(timeout).is_err() {
            shell.warn(format!("scrape for manager {manager} exceeded {timeout:?} deadline, still draining"));
        }
    });
}

/// Renders every sample from this scrape as a Prometheus-like text line
/// on stdout. This is a demonstration sink only: the real HTTP scrape
/// server and wire encoding are external collaborators (see §1 of the
/// design notes on scope).
fn render(rx: Receiver<Sample>) {
    for sample in rx.iter() {
        let mut line = String::with_capacity(64);
        line.push_str(sample.name);
        if !sample.labels.is_empty() {
            line.push('{');
            for (i, (key, value)) in sample.labels.iter().enumerate() {
                if i > 0 {
                    line.push(',');
                }
                line.push_str(key);
                line.push_str("=\"");
                line.push_str(&value.replace('"', "\\\""));
                line.push('"');
            }
            line.push('}');
        }
        line.push(' ');
        line.push_str(&sample.value.to_string());
        println!("{line}");
    }
}
