//! Process creation intake backed by procfs.
//!
//! The monitor polls `/proc` and hands every process it hasn't seen before
//! to the [`Detector`], oldest first so that ancestors are recorded before
//! their descendants. A process is identified by its pid and start time, so
//! a pid recycled between two scans is a new process. Processes already
//! running at startup only seed the birth-time store.
//!
//! Polling can't observe processes living less than a poll interval: the
//! shorter the interval, the fewer creations go unnoticed.

use std::{collections::HashMap, sync::Arc, time::Duration};

use forkguard_core::{
    ConfigError, CreationEvent, Detector, Enforcer, ModuleConfig, Outcome, ProcessHandle,
};
use host_common::{
    Pid, log_error,
    parsing::procfs::{self, ProcfsError},
    time::Timestamp,
};
use thiserror::Error;
use tokio::{
    sync::watch,
    task::JoinError,
    time::{self, MissedTickBehavior},
};

mod enforcer;
mod handle;

pub use enforcer::SignalEnforcer;
pub use handle::ProcfsProcess;

pub const MODULE_NAME: &str = "process-monitor";

const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

impl TryFrom<&ModuleConfig> for Config {
    type Error = ConfigError;

    fn try_from(config: &ModuleConfig) -> Result<Self, Self::Error> {
        let poll_interval_ms = config.with_default("poll_interval_ms", DEFAULT_POLL_INTERVAL_MS)?;
        if poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "poll_interval_ms".to_string(),
                value: "0".to_string(),
                err: "must be greater than zero".to_string(),
            });
        }
        Ok(Self {
            poll_interval: Duration::from_millis(poll_interval_ms),
        })
    }
}

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("reading running processes")]
    Procfs(#[from] ProcfsError),
    #[error("procfs scanner task failed")]
    Join(#[from] JoinError),
}

pub struct ProcessMonitor<E> {
    detector: Arc<Detector<E>>,
    /// start time of the pids present at the last scan
    known: HashMap<Pid, Timestamp>,
}

impl<E: Enforcer> ProcessMonitor<E> {
    pub fn new(detector: Arc<Detector<E>>) -> Self {
        Self {
            detector,
            known: HashMap::new(),
        }
    }

    /// Record the birth time of every running process, without judging them.
    pub fn seed(&mut self) -> Result<usize, MonitorError> {
        for pid in procfs::get_running_processes()? {
            match procfs::get_process_stat(pid) {
                Ok(stat) => {
                    self.detector.store().record_birth(pid, stat.start_time);
                    self.known.insert(pid, stat.start_time);
                }
                Err(err) if err.is_not_found() => {}
                Err(err) => log::debug!("Error reading process {pid}: {err}"),
            }
        }
        Ok(self.known.len())
    }

    /// Run the detector on every process created since the last scan.
    pub fn scan(&mut self) -> Result<Vec<(Pid, Outcome)>, MonitorError> {
        let loaded = procfs::get_running_processes()?
            .into_iter()
            .map(|pid| (pid, ProcfsProcess::load(pid)))
            .collect();
        Ok(self.judge_created(loaded))
    }

    /// Replace the known processes with the ones just read and run the
    /// detector on the new ones, oldest first.
    ///
    /// A pid is new if it is unknown or if its start time changed: it was
    /// reused. A pid which couldn't be read is kept only if it was known, so
    /// it is retried at the next scan.
    fn judge_created(
        &mut self,
        loaded: Vec<(Pid, Result<ProcfsProcess, ProcfsError>)>,
    ) -> Vec<(Pid, Outcome)> {
        let mut known = HashMap::with_capacity(loaded.len());
        let mut created = Vec::new();
        for (pid, result) in loaded {
            match result {
                Ok(process) => {
                    let start_time = process.start_time();
                    if self.known.get(&pid) != Some(&start_time) {
                        created.push(process);
                    }
                    known.insert(pid, start_time);
                }
                Err(err) if err.is_not_found() => {}
                Err(err) => {
                    log::debug!("Error reading process {pid}: {err}");
                    if let Some(start_time) = self.known.get(&pid) {
                        known.insert(pid, *start_time);
                    }
                }
            }
        }
        self.known = known;
        created.sort_by_key(|process| (process.start_time(), process.pid()));

        created
            .iter()
            .map(|process| {
                let outcome = self.detector.on_process_created(
                    process,
                    CreationEvent {
                        pid: process.pid(),
                        parent_pid: process.parent_pid(),
                        timestamp: process.start_time(),
                    },
                );
                (process.pid(), outcome)
            })
            .collect()
    }

    /// Seed the store, then scan procfs every `poll_interval` until shutdown.
    ///
    /// Procfs is read on the blocking thread pool.
    pub async fn run(
        self,
        config: Config,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), MonitorError> {
        let (mut monitor, seeded) = tokio::task::spawn_blocking(move || {
            let mut monitor = self;
            let seeded = monitor.seed();
            (monitor, seeded)
        })
        .await?;
        log::info!("Tracking {} running processes", seeded?);

        let mut interval = time::interval(config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.changed() => return Ok(()),
                _ = interval.tick() => {
                    let (scanned, result) = tokio::task::spawn_blocking(move || {
                        let result = monitor.scan();
                        (monitor, result)
                    })
                    .await?;
                    monitor = scanned;
                    match result {
                        Ok(outcomes) if !outcomes.is_empty() => {
                            log::trace!("{} new processes", outcomes.len());
                        }
                        Ok(_) => {}
                        Err(err) => log_error("Error scanning running processes", err),
                    }
                }
            }
        }
    }
}
