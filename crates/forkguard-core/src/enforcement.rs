//! The [`Enforcer`] trait is used by the detector to terminate processes.
//!
//! [`Enforcer::request_termination`] must not block: the request is one-way
//! and the detector never learns whether the process actually exited.

use host_common::Pid;
use tokio::sync::mpsc;

/// Kill only when the names match and the creation is a burst.
pub fn decide(name_matches: bool, is_burst: bool) -> bool {
    name_matches && is_burst
}

pub trait Enforcer: Send + Sync + 'static {
    /// Must not block since it runs on the process creation path
    fn request_termination(&self, pid: Pid);
}

/// Forward termination requests to a task owning the privileged mechanism.
impl Enforcer for mpsc::UnboundedSender<Pid> {
    fn request_termination(&self, pid: Pid) {
        if self.send(pid).is_err() {
            log::warn!("enforcement channel closed, {pid} will not be terminated");
        }
    }
}

/// Only report what would have been terminated.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRun;

impl Enforcer for DryRun {
    fn request_termination(&self, pid: Pid) {
        log::info!("dry run: not terminating {pid}");
    }
}
