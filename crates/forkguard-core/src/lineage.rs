use host_common::Pid;

use crate::name::ProcessName;

/// Default hard limit on parent hops performed by [`ancestor_at`].
pub const DEFAULT_MAX_LINEAGE_STEPS: usize = 10;

/// Read-only view of a process, able to reach its parent.
///
/// Implementations decide what the root of the tree is: `parent` returns
/// `None` when there is no parent or it can't be resolved anymore.
pub trait ProcessHandle: Clone {
    fn pid(&self) -> Pid;
    fn name(&self) -> ProcessName;
    fn parent(&self) -> Option<Self>;
}

/// Returns the ancestor `depth` generations above `handle`.
///
/// The walk performs at most `ceiling` steps: deeper requests silently stop
/// there. Depth 0 is the handle itself.
pub fn ancestor_at<H: ProcessHandle>(handle: &H, depth: usize, ceiling: usize) -> Option<H> {
    let mut current = handle.clone();
    for _ in 0..depth.min(ceiling) {
        current = current.parent()?;
    }
    Some(current)
}
