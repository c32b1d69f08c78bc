//! Scheduler error types

use crate::queue::QueueKind;
use crate::task::{TaskHandle, TaskState};
use core_types::{CoreId, CpuSet, Priority};
use thiserror::Error;

/// Errors returned by scheduler setup and task registration
///
/// The scheduling entry points themselves never fail; these cover the
/// operations around them whose preconditions can be checked up front.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedError {
    /// Core count is zero or beyond what a `CpuSet` can hold
    #[error("Invalid core count: {0}")]
    InvalidCoreCount(usize),

    /// Task table too small for the idle tasks
    #[error("Task capacity {capacity} cannot hold {required} idle tasks")]
    InvalidCapacity { capacity: usize, required: usize },

    /// Every task slot is in use
    #[error("Task table full ({0} slots)")]
    TaskTableFull(usize),

    /// Handle does not name a live task
    #[error("Unknown task: {0}")]
    UnknownTask(TaskHandle),

    /// Task is still a member of a queue
    #[error("Task {0} is still queued")]
    TaskStillQueued(TaskHandle),

    /// Priority reserved for idle tasks
    #[error("Priority {0} is reserved for idle tasks")]
    InvalidPriority(Priority),

    /// Affinity leaves no online core to run on
    #[error("No online core is eligible (affinity {0})")]
    NoEligibleCore(CpuSet),
}

/// A broken scheduler invariant, as reported by `verify()`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    /// Runnable task found in no queue
    #[error("{task} is {state:?} but not queued")]
    Orphaned { task: TaskHandle, state: TaskState },

    /// Blocked task still linked into a queue
    #[error("{task} is blocked but still linked into {queue:?}")]
    BlockedInQueue { task: TaskHandle, queue: QueueKind },

    /// Links or membership tags disagree with the queue walk
    #[error("{queue:?} links are inconsistent at {task}")]
    BrokenLinks { queue: QueueKind, task: TaskHandle },

    /// Recorded length or tail disagrees with the queue walk
    #[error("{queue:?} records {recorded} entries but {walked} are linked")]
    LengthMismatch {
        queue: QueueKind,
        recorded: usize,
        walked: usize,
    },

    /// Priority increases somewhere from head to tail
    #[error("{queue:?} is out of priority order at {task}")]
    Unordered { queue: QueueKind, task: TaskHandle },

    /// A queue entry carries a state that does not belong there
    #[error("{task} in {queue:?} is {state:?}")]
    StateMismatch {
        queue: QueueKind,
        task: TaskHandle,
        state: TaskState,
    },

    /// Hard-bound task outside its core's run queue or the pending queue
    #[error("Core-locked {task} found in {queue:?}")]
    LockedTaskMisplaced { task: TaskHandle, queue: QueueKind },

    /// A core has no running task
    #[error("{0} has an empty run queue")]
    EmptyRunQueue(CoreId),

    /// Lock holder bitmask disagrees with the running tasks' counts
    #[error("Lock holders {recorded} disagree with running tasks {expected}")]
    LockHoldersMismatch { recorded: CpuSet, expected: CpuSet },
}
