//! Dispatch glue
//!
//! Turns a scheduler decision into at most one context switch on the calling
//! core. Switches the scheduler completed on other cores are carried out by
//! those cores when they resume.

use crate::task::TaskHandle;
use crate::ReadyToRun;
use core_types::{CoreId, TaskId};
use hal::ContextSwitch;

/// Makes `task` runnable and switches to it if it took over this core
pub fn unblock_task<S, C>(sched: &mut S, switch: &mut C, task: TaskHandle) -> bool
where
    S: ReadyToRun + ?Sized,
    C: ContextSwitch,
{
    let core = sched.this_core();
    let from = running_id(sched, core);
    let switched = sched.make_runnable(task);
    finish(sched, switch, core, from, switched)
}

/// Takes `task` out of the queues and switches away if it was running here
pub fn block_task<S, C>(sched: &mut S, switch: &mut C, task: TaskHandle) -> bool
where
    S: ReadyToRun + ?Sized,
    C: ContextSwitch,
{
    let core = sched.this_core();
    let from = running_id(sched, core);
    let switched = sched.remove_runnable(task);
    finish(sched, switch, core, from, switched)
}

/// Drops one preemption lock level and runs whatever was deferred behind it
pub fn release_preemption<S, C>(sched: &mut S, switch: &mut C) -> bool
where
    S: ReadyToRun + ?Sized,
    C: ContextSwitch,
{
    let core = sched.this_core();
    let from = running_id(sched, core);
    let switched = sched.unlock_preemption();
    finish(sched, switch, core, from, switched)
}

fn finish<S, C>(sched: &S, switch: &mut C, core: CoreId, from: TaskId, switched: bool) -> bool
where
    S: ReadyToRun + ?Sized,
    C: ContextSwitch,
{
    if !switched {
        return false;
    }
    let to = running_id(sched, core);
    if to == from {
        return false;
    }
    switch.switch_context(core, from, to);
    true
}

fn running_id<S>(sched: &S, core: CoreId) -> TaskId
where
    S: ReadyToRun + ?Sized,
{
    let handle = sched.running_task(core);
    match sched.task(handle) {
        Some(tcr) => tcr.id(),
        None => unreachable!("running {} has no record", handle),
    }
}
