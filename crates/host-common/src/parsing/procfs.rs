//! Utility functions used to extract data from procfs

use glob::glob;
use nix::unistd::Pid;
use std::{fs, io};
use thiserror::Error;

use crate::time::Timestamp;

/// Index of `starttime` among the fields following the command name in
/// `/proc/<pid>/stat` (field 22 overall, the first one after `comm` is `state`).
const STAT_STARTTIME_INDEX: usize = 19;
/// Index of `ppid` among the fields following the command name.
const STAT_PPID_INDEX: usize = 1;

#[derive(Error, Debug)]
pub enum ProcfsError {
    #[error("reading file failed {path}")]
    ReadFile {
        #[source]
        source: io::Error,
        path: String,
    },
    #[error("malformed stat for process {pid}: {reason}")]
    MalformedStat { pid: Pid, reason: &'static str },
    #[error("globbing running processes")]
    GlobbingError(#[from] glob::PatternError),
    #[error("unreadable entry")]
    GlobError(#[from] glob::GlobError),
    #[error(transparent)]
    ParseIntError(#[from] std::num::ParseIntError),
}

impl ProcfsError {
    /// The process disappeared before we could read it.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProcfsError::ReadFile { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

/// The subset of `/proc/<pid>/stat` the detector cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessStat {
    pub pid: Pid,
    /// Raw command name, as the kernel reports it (at most 15 bytes).
    pub comm: Vec<u8>,
    pub ppid: Pid,
    pub start_time: Timestamp,
}

/// Returns the stat information of a given process.
pub fn get_process_stat(pid: Pid) -> Result<ProcessStat, ProcfsError> {
    let path = format!("/proc/{pid}/stat");
    let data = fs::read(&path).map_err(|source| ProcfsError::ReadFile { source, path })?;
    parse_stat(pid, &data)
}

/// Parse the content of `/proc/<pid>/stat`.
///
/// The command name is enclosed in parentheses and may itself contain spaces
/// and parentheses, so it extends up to the last `)` of the line.
pub fn parse_stat(pid: Pid, data: &[u8]) -> Result<ProcessStat, ProcfsError> {
    let open = data
        .iter()
        .position(|b| *b == b'(')
        .ok_or(ProcfsError::MalformedStat {
            pid,
            reason: "missing command name",
        })?;
    let close = data
        .iter()
        .rposition(|b| *b == b')')
        .filter(|close| *close > open)
        .ok_or(ProcfsError::MalformedStat {
            pid,
            reason: "unterminated command name",
        })?;
    let comm = data[open + 1..close].to_vec();

    let rest = String::from_utf8_lossy(&data[close + 1..]);
    let fields: Vec<&str> = rest.split_whitespace().collect();
    let field = |index: usize, reason: &'static str| {
        fields
            .get(index)
            .copied()
            .ok_or(ProcfsError::MalformedStat { pid, reason })
    };

    let ppid: i32 = field(STAT_PPID_INDEX, "missing ppid")?.parse()?;
    let start_ticks: u64 = field(STAT_STARTTIME_INDEX, "missing starttime")?.parse()?;

    Ok(ProcessStat {
        pid,
        comm,
        ppid: Pid::from_raw(ppid),
        start_time: Timestamp::from_clock_ticks(start_ticks),
    })
}

pub fn get_running_processes() -> Result<Vec<Pid>, ProcfsError> {
    glob("/proc/[0-9]*")?
        .map(|entry| {
            let entry: String = entry?.to_string_lossy().into();
            let pid = entry.replace("/proc/", "").parse()?;
            Ok(Pid::from_raw(pid))
        })
        .collect()
}
