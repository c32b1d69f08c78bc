//! Context switch abstraction

use core_types::{CoreId, TaskId};

/// Architecture-specific register save/restore
///
/// Invoked on the calling core after the scheduler reports that the core's
/// running task changed. The implementation saves the registers of `from`
/// and restores those of `to`.
pub trait ContextSwitch {
    /// Switches `core` from task `from` to task `to`
    fn switch_context(&mut self, core: CoreId, from: TaskId, to: TaskId);
}
