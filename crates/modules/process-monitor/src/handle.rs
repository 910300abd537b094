use forkguard_core::{ProcessHandle, ProcessName};
use host_common::{
    Pid,
    parsing::procfs::{self, ProcessStat, ProcfsError},
    time::Timestamp,
};

/// A process seen through procfs.
///
/// The stat is read once, when the handle is created: the handle keeps
/// describing the process even if it exits afterwards.
#[derive(Debug, Clone)]
pub struct ProcfsProcess {
    stat: ProcessStat,
}

impl ProcfsProcess {
    pub fn load(pid: Pid) -> Result<Self, ProcfsError> {
        procfs::get_process_stat(pid).map(Self::from_stat)
    }

    pub fn from_stat(stat: ProcessStat) -> Self {
        Self { stat }
    }

    pub fn parent_pid(&self) -> Pid {
        self.stat.ppid
    }

    pub fn start_time(&self) -> Timestamp {
        self.stat.start_time
    }
}

impl ProcessHandle for ProcfsProcess {
    fn pid(&self) -> Pid {
        self.stat.pid
    }

    fn name(&self) -> ProcessName {
        ProcessName::new(&self.stat.comm)
    }

    /// Pid 0 is the root. A parent younger than its child means the parent
    /// exited and its pid was reused: the chain is broken.
    fn parent(&self) -> Option<Self> {
        if self.stat.ppid.as_raw() == 0 {
            return None;
        }
        let parent = Self::load(self.stat.ppid)
            .map_err(|err| log::trace!("parent of {} unavailable: {err}", self.stat.pid))
            .ok()?;
        if parent.start_time() > self.start_time() {
            log::trace!("pid {} was reused", parent.pid());
            return None;
        }
        Some(parent)
    }
}

#[cfg(test)]
mod tests {
    use forkguard_core::lineage::ancestor_at;

    use super::*;

    #[test]
    fn own_lineage_is_walkable() {
        let me = ProcfsProcess::load(Pid::this()).unwrap();
        assert_eq!(me.pid(), Pid::this());
        assert_eq!(me.parent_pid(), Pid::parent());
        assert!(!me.name().is_empty());

        let parent = me.parent().unwrap();
        assert_eq!(parent.pid(), Pid::parent());
        assert!(parent.start_time() <= me.start_time());
        assert_eq!(ancestor_at(&me, 1, 10).unwrap().pid(), Pid::parent());
    }

    #[test]
    fn root_has_no_parent() {
        let root = ProcfsProcess::from_stat(ProcessStat {
            pid: Pid::from_raw(1),
            comm: b"init".to_vec(),
            ppid: Pid::from_raw(0),
            start_time: 0.into(),
        });
        assert!(root.parent().is_none());
    }

    #[test]
    fn reused_parent_pid_breaks_the_chain() {
        // the test process started after this fake child
        let orphan = ProcfsProcess::from_stat(ProcessStat {
            pid: Pid::from_raw(i32::MAX),
            comm: b"orphan".to_vec(),
            ppid: Pid::this(),
            start_time: 0.into(),
        });
        assert!(orphan.parent().is_none());
    }
}
