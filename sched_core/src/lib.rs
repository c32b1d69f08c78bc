//! # Scheduler Core
//!
//! This crate decides, whenever a task becomes runnable, which queue it
//! belongs in and whether it must immediately take over a core.
//!
//! ## Purpose
//!
//! - Priority-ordered queues with FIFO among equal priorities
//! - A uniprocessor scheduler with one ready queue
//! - A multiprocessor scheduler with one run queue per core and
//!   lowest-priority core selection
//! - Preemption locking that defers scheduling into a pending queue
//!
//! ## Philosophy
//!
//! **The scheduler decides, the hardware seams act.**
//!
//! Nothing here saves registers or sends interrupts. The calling core, the
//! cross-core pause protocol and context switching are traits from the `hal`
//! crate, so the same code runs on hardware and under `cargo test`.
//!
//! Entry points report through a `bool` ("the calling core must switch
//! tasks"). Misconfiguration is fatal and invariant violations are debug
//! assertions; recoverable errors only arise while building a scheduler or
//! registering a task.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod audit;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod lock;
pub mod queue;
pub mod scheduler;
pub mod smp;
pub mod task;
#[cfg(not(target_os = "none"))]
pub mod test_utils;
mod verify;

pub use audit::{SchedAuditLog, SchedEvent};
pub use config::SchedulerConfig;
pub use dispatch::{block_task, release_preemption, unblock_task};
pub use error::{InvariantViolation, SchedError};
pub use lock::PreemptionLock;
pub use queue::{QueueIter, QueueKind, TaskQueue};
pub use scheduler::UpScheduler;
pub use smp::SmpScheduler;
pub use task::{TaskControlRecord, TaskHandle, TaskState, TaskTable};

use core_types::CoreId;
use hal::{CpuHal, CrossCorePauseResume};

/// The scheduler selected for this build
#[cfg(not(feature = "smp"))]
pub type Scheduler = UpScheduler;

/// The scheduler selected for this build
#[cfg(feature = "smp")]
pub type Scheduler<P> = SmpScheduler<P>;

/// Ready-to-run entry points shared by both schedulers
///
/// All methods act on behalf of the calling core with its interrupts masked.
pub trait ReadyToRun {
    /// The calling core
    fn this_core(&self) -> CoreId;

    /// Running task of `core`
    fn running_task(&self, core: CoreId) -> TaskHandle;

    fn task(&self, task: TaskHandle) -> Option<&TaskControlRecord>;

    /// Adds a task that just stopped waiting
    ///
    /// Returns true iff the calling core's running task changed.
    fn make_runnable(&mut self, task: TaskHandle) -> bool;

    /// Removes a task that is about to block
    ///
    /// Returns true iff the calling core's running task changed.
    fn remove_runnable(&mut self, task: TaskHandle) -> bool;

    fn lock_preemption(&mut self);

    /// Returns true iff merging deferred tasks changed the running task
    fn unlock_preemption(&mut self) -> bool;
}

impl ReadyToRun for UpScheduler {
    fn this_core(&self) -> CoreId {
        CoreId(0)
    }

    fn running_task(&self, core: CoreId) -> TaskHandle {
        debug_assert_eq!(core, CoreId(0));
        self.current_task()
    }

    fn task(&self, task: TaskHandle) -> Option<&TaskControlRecord> {
        UpScheduler::task(self, task)
    }

    fn make_runnable(&mut self, task: TaskHandle) -> bool {
        UpScheduler::make_runnable(self, task)
    }

    fn remove_runnable(&mut self, task: TaskHandle) -> bool {
        UpScheduler::remove_runnable(self, task)
    }

    fn lock_preemption(&mut self) {
        UpScheduler::lock_preemption(self)
    }

    fn unlock_preemption(&mut self) -> bool {
        UpScheduler::unlock_preemption(self)
    }
}

impl<P> ReadyToRun for SmpScheduler<P>
where
    P: CpuHal + CrossCorePauseResume,
{
    fn this_core(&self) -> CoreId {
        self.platform().this_cpu()
    }

    fn running_task(&self, core: CoreId) -> TaskHandle {
        SmpScheduler::running_task(self, core)
    }

    fn task(&self, task: TaskHandle) -> Option<&TaskControlRecord> {
        SmpScheduler::task(self, task)
    }

    fn make_runnable(&mut self, task: TaskHandle) -> bool {
        self.make_runnable_smp(task)
    }

    fn remove_runnable(&mut self, task: TaskHandle) -> bool {
        SmpScheduler::remove_runnable(self, task)
    }

    fn lock_preemption(&mut self) {
        SmpScheduler::lock_preemption(self)
    }

    fn unlock_preemption(&mut self) -> bool {
        SmpScheduler::unlock_preemption(self)
    }
}
