use forkguard_core::Enforcer;
use host_common::Pid;
use nix::{
    errno::Errno,
    sys::signal::{Signal, kill},
};

/// Terminates processes with `SIGKILL`.
///
/// Init and forkguard itself are never signalled.
#[derive(Debug, Clone, Copy)]
pub struct SignalEnforcer {
    own_pid: Pid,
}

impl SignalEnforcer {
    pub fn new() -> Self {
        Self {
            own_pid: Pid::this(),
        }
    }

    fn is_protected(&self, pid: Pid) -> bool {
        pid.as_raw() <= 1 || pid == self.own_pid
    }
}

impl Default for SignalEnforcer {
    fn default() -> Self {
        Self::new()
    }
}

impl Enforcer for SignalEnforcer {
    fn request_termination(&self, pid: Pid) {
        if self.is_protected(pid) {
            log::warn!("refusing to terminate protected process {pid}");
            return;
        }
        match kill(pid, Signal::SIGKILL) {
            Ok(()) => log::debug!("SIGKILL sent to {pid}"),
            Err(Errno::ESRCH) => log::debug!("{pid} already exited, nothing to terminate"),
            Err(err) => log::warn!("failed to terminate {pid}: {err}"),
        }
    }
}
