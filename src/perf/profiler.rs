//! Perf Profiler: opens per-process hardware/software/cache counters,
//! scales multiplexed reads, and aggregates scaled deltas into a
//! per-unit running total.

use std::collections::{HashMap, HashSet};
use std::os::unix::io::RawFd;
use std::sync::Mutex;

use crate::model::{PerfEvent, PerfReading};
use crate::perf::events::{self, CACHE_EVENTS, HARDWARE_EVENTS, SOFTWARE_EVENTS};
use crate::perf::sys::{self, PerfEventAttr};
use crate::security::SecurityContext;
use crate::shell::Shell;
use crate::sink::{Sample, Sink};

/// One process attributed to one compute unit, as handed to the
/// profiler by the orchestrator after ignored-helper filtering.
pub struct ProfiledProcess {
    pub uuid: String,
    pub pid: u32,
}

pub struct Profiler {
    events: Vec<PerfEvent>,
    target_env: Vec<String>,
    security: SecurityContext,

    fds: Mutex<HashMap<(u32, PerfEvent), RawFd>>,
    last_scaled: Mutex<HashMap<(u32, PerfEvent), f64>>,
    unit_totals: Mutex<HashMap<(String, PerfEvent), f64>>,
    disabled_families: Mutex<HashSet<&'static str>>,
}

impl Profiler {
    #[must_use]
    pub fn new(target_env: Vec<String>) -> Self {
        let events = HARDWARE_EVENTS
            .iter()
            .chain(SOFTWARE_EVENTS)
            .chain(CACHE_EVENTS)
            .copied()
            .collect();
        Self {
            events,
            target_env,
            security: SecurityContext::new(
                "perf-environ-filter",
                vec![caps::Capability::CAP_SYS_PTRACE, caps::Capability::CAP_DAC_READ_SEARCH],
            ),
            fds: Mutex::new(HashMap::new()),
            last_scaled: Mutex::new(HashMap::new()),
            unit_totals: Mutex::new(HashMap::new()),
            disabled_families: Mutex::new(HashSet::new()),
        }
    }

    /// Runs one scrape: opens any new fds, reads every open fd, emits
    /// per-unit counter samples, and evicts state for anything no longer
    /// present in `processes`.
    pub fn scrape(&self, processes: &[ProfiledProcess], sink: &impl Sink, shell: &Shell) {
        let processes = self.apply_env_filter(processes, shell);

        let mut active_pids: HashSet<u32> = HashSet::new();
        let mut active_uuids: HashSet<String> = HashSet::new();
        let mut deltas: HashMap<(String, PerfEvent), f64> = HashMap::new();

        for process in &processes {
            active_pids.insert(process.pid);
            active_uuids.insert(process.uuid.clone());

            for &event in &self.events {
                let family = events::family_of(event);
                if self.disabled_families.lock().unwrap().contains(family) {
                    continue;
                }

                let fd = match self.fd_for(process.pid, event) {
                    Ok(fd) => fd,
                    Err(e) => {
                        if e.kind() == std::io::ErrorKind::PermissionDenied {
                            shell.warn(format!("perf: permission denied opening {family} events, disabling family"));
                            self.disabled_families.lock().unwrap().insert(family);
                        } else {
                            shell.debug(format!("perf: failed to open {event} for pid {}: {e}", process.pid));
                        }
                        continue;
                    },
                };

                let Ok((value, time_enabled, time_running)) = sys::read_counter(fd) else {
                    continue;
                };
                let reading = PerfReading { value, time_enabled, time_running };

                let mut last_scaled = self.last_scaled.lock().unwrap();
                let key = (process.pid, event);
                let previous = last_scaled.get(&key).copied().unwrap_or(0.0);
                let current = reading.scaled().unwrap_or(previous);
                let delta = (current - previous).max(0.0);
                last_scaled.insert(key, current);
                drop(last_scaled);

                *deltas.entry((process.uuid.clone(), event)).or_insert(0.0) += delta;
            }
        }

        let mut totals = self.unit_totals.lock().unwrap();
        for (key, delta) in deltas {
            *totals.entry(key).or_insert(0.0) += delta;
        }
        totals.retain(|(uuid, _), _| active_uuids.contains(uuid));

        for ((uuid, event), total) in totals.iter() {
            sink.emit(
                Sample::counter("perf_event_total", *total)
                    .with_label("uuid", uuid.clone())
                    .with_label("event", event.to_string()),
            );
        }
        drop(totals);

        self.evict_closed_fds(&active_pids);
    }

    fn fd_for(&self, pid: u32, event: PerfEvent) -> std::io::Result<RawFd> {
        let mut fds = self.fds.lock().unwrap();
        let key = (pid, event);
        if let Some(fd) = fds.get(&key) {
            return Ok(*fd);
        }
        let (perf_type, config) = events::attr_args(event);
        let attr = PerfEventAttr::new(perf_type, config);
        let fd = sys::perf_event_open(&attr, pid as libc::pid_t)?;
        let _ = sys::enable(fd);
        fds.insert(key, fd);
        Ok(fd)
    }

    fn evict_closed_fds(&self, active_pids: &HashSet<u32>) {
        let mut fds = self.fds.lock().unwrap();
        let stale: Vec<(u32, PerfEvent)> = fds.keys().filter(|(pid, _)| !active_pids.contains(pid)).copied().collect();
        for key in stale {
            if let Some(fd) = fds.remove(&key) {
                sys::close(fd);
            }
        }
        drop(fds);
        self.last_scaled.lock().unwrap().retain(|(pid, _), _| active_pids.contains(pid));
    }

    /// Restricts the process list to those whose environment contains
    /// one of the configured target variable names, if any are
    /// configured. Runs sequentially inside a single security-context
    /// callback per the "no fan-out under raised capabilities" rule.
    fn apply_env_filter<'p>(&self, processes: &'p [ProfiledProcess], shell: &Shell) -> Vec<&'p ProfiledProcess> {
        if self.target_env.is_empty() {
            return processes.iter().collect();
        }

        let target_env = &self.target_env;
        let result = self.security.run(|| {
            processes
                .iter()
                .filter(|p| {
                    crate::util::read_environ(p.pid)
                        .is_some_and(|env| target_env.iter().any(|name| env.contains_key(name)))
                })
                .collect::<Vec<_>>()
        });

        match result {
            Ok(filtered) => filtered,
            Err(e) => {
                shell.warn(format!("perf: environment filter disabled, capability acquisition failed: {e}"));
                processes.iter().collect()
            },
        }
    }

    /// Closes every open perf fd. Called on shutdown; afterward no fd
    /// opened by this profiler remains open.
    pub fn stop(&self) {
        let mut fds = self.fds.lock().unwrap();
        for (_, fd) in fds.drain() {
            sys::close(fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_target_env_profiles_everything() {
        let profiler = Profiler::new(vec![]);
        let procs = vec![ProfiledProcess { uuid: "1009249".into(), pid: std::process::id() }];
        let shell = Shell::from_write(Box::new(std::io::sink()), Box::new(std::io::sink()));
        let filtered = profiler.apply_env_filter(&procs, &shell);
        assert_eq!(filtered.len(), 1);
    }
}
