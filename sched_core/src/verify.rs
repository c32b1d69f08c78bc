//! Invariant checks shared by both schedulers

use crate::error::InvariantViolation;
use crate::lock::PreemptionLock;
use crate::queue::TaskQueue;
use crate::task::{TaskControlRecord, TaskHandle, TaskTable};
use core_types::{CoreId, CpuSet};

/// Walks `queue` head to tail, checking links, tags and ordering
///
/// `visit` receives each entry's position and record for the
/// scheduler-specific state rules.
pub(crate) fn walk_queue<F>(
    tasks: &TaskTable,
    queue: &TaskQueue,
    mut visit: F,
) -> Result<(), InvariantViolation>
where
    F: FnMut(usize, TaskHandle, &TaskControlRecord) -> Result<(), InvariantViolation>,
{
    let kind = queue.kind();
    let mut prev: Option<TaskHandle> = None;
    let mut walked = 0;
    let mut cursor = queue.head();

    while let Some(handle) = cursor {
        let broken = InvariantViolation::BrokenLinks {
            queue: kind,
            task: handle,
        };
        let tcr = tasks.get(handle).ok_or_else(|| broken.clone())?;
        if tcr.links.queue != Some(kind) || tcr.links.prev != prev || walked >= tasks.capacity() {
            return Err(broken);
        }
        if let Some(prev) = prev {
            if tcr.priority() > tasks[prev].priority() {
                return Err(InvariantViolation::Unordered {
                    queue: kind,
                    task: handle,
                });
            }
        }
        visit(walked, handle, tcr)?;
        walked += 1;
        prev = Some(handle);
        cursor = tcr.links.next;
    }

    if walked != queue.len() || queue.tail() != prev {
        return Err(InvariantViolation::LengthMismatch {
            queue: kind,
            recorded: queue.len(),
            walked,
        });
    }
    Ok(())
}

/// Every runnable task is linked somewhere, every blocked task nowhere
///
/// Together with the per-queue tag check in [`walk_queue`] this means each
/// runnable task is reachable from exactly one queue.
pub(crate) fn check_membership(tasks: &TaskTable) -> Result<(), InvariantViolation> {
    for (handle, tcr) in tasks.iter() {
        match (tcr.state().is_runnable(), tcr.links.queue) {
            (true, None) => {
                return Err(InvariantViolation::Orphaned {
                    task: handle,
                    state: tcr.state(),
                })
            }
            (false, Some(queue)) => {
                return Err(InvariantViolation::BlockedInQueue {
                    task: handle,
                    queue,
                })
            }
            _ => {}
        }
    }
    Ok(())
}

/// Holder sets must mirror the running tasks' lock and IRQ counts
pub(crate) fn check_lock_holders<I>(
    tasks: &TaskTable,
    lock: &PreemptionLock,
    running: I,
) -> Result<(), InvariantViolation>
where
    I: IntoIterator<Item = (CoreId, TaskHandle)>,
{
    let mut sched = CpuSet::empty();
    let mut irq = CpuSet::empty();
    for (core, handle) in running {
        let tcr = &tasks[handle];
        if tcr.lock_count() > 0 {
            sched.insert(core).ok();
        }
        if tcr.irq_count() > 0 {
            irq.insert(core).ok();
        }
    }
    if sched != lock.sched_holders() {
        return Err(InvariantViolation::LockHoldersMismatch {
            recorded: lock.sched_holders(),
            expected: sched,
        });
    }
    if irq != lock.irq_holders() {
        return Err(InvariantViolation::LockHoldersMismatch {
            recorded: lock.irq_holders(),
            expected: irq,
        });
    }
    Ok(())
}
