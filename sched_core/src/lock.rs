//! Preemption lock state
//!
//! Two holder sets gate immediate scheduling decisions: the cores whose
//! running task holds the scheduler lock (`lock_count > 0`) and the cores
//! whose running task is inside a critical section (`irq_count > 0`). The
//! counts travel with the tasks; the sets are refreshed whenever a core's
//! running task changes.

use crate::task::TaskControlRecord;
use core_types::{CoreId, CpuSet};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreemptionLock {
    sched_holders: CpuSet,
    irq_holders: CpuSet,
    /// Sum of every task's `lock_count`, blocked tasks included
    lock_total: u32,
}

impl PreemptionLock {
    pub const fn new() -> Self {
        Self {
            sched_holders: CpuSet::empty(),
            irq_holders: CpuSet::empty(),
            lock_total: 0,
        }
    }

    pub fn sched_holders(&self) -> CpuSet {
        self.sched_holders
    }

    pub fn irq_holders(&self) -> CpuSet {
        self.irq_holders
    }

    pub fn lock_total(&self) -> u32 {
        self.lock_total
    }

    /// Returns true if any core holds the scheduler lock
    pub fn is_sched_locked(&self) -> bool {
        !self.sched_holders.is_empty()
    }

    pub fn holds_sched(&self, core: CoreId) -> bool {
        self.sched_holders.contains(core)
    }

    pub fn holds_irq(&self, core: CoreId) -> bool {
        self.irq_holders.contains(core)
    }

    /// Scheduler lock held by a core other than `core`
    pub fn sched_locked_for(&self, core: CoreId) -> bool {
        !self.sched_holders.without(core).is_empty()
    }

    /// Interrupt lock held by some core other than `core`
    ///
    /// Only the exclusive holder is exempt.
    pub fn irq_locked_for(&self, core: CoreId) -> bool {
        !self.irq_holders.without(core).is_empty()
    }

    /// Whether `core` must defer scheduling decisions
    ///
    /// A core holding either lock may still schedule for itself.
    pub fn is_locked_for(&self, core: CoreId) -> bool {
        self.sched_locked_for(core) || self.irq_locked_for(core)
    }

    /// Deferral test for a decision made on `me` about `target`
    ///
    /// The interrupt lock defers when any core other than `me` and `target`
    /// holds it.
    pub fn defers(&self, me: CoreId, target: CoreId) -> bool {
        self.sched_locked_for(me) || !self.irq_holders.without(me).without(target).is_empty()
    }

    /// Refreshes `core`'s holder bits from its (new) running task
    pub(crate) fn sync_with(&mut self, core: CoreId, running: &TaskControlRecord) {
        self.set_sched_holder(core, running.lock_count > 0);
        self.set_irq_holder(core, running.irq_count > 0);
    }

    pub(crate) fn clear_core(&mut self, core: CoreId) {
        self.set_sched_holder(core, false);
        self.set_irq_holder(core, false);
    }

    pub(crate) fn acquired(&mut self) {
        self.lock_total += 1;
    }

    pub(crate) fn released(&mut self) {
        debug_assert!(self.lock_total > 0);
        self.lock_total = self.lock_total.saturating_sub(1);
    }

    fn set_sched_holder(&mut self, core: CoreId, held: bool) {
        if held {
            insert_core(&mut self.sched_holders, core);
        } else {
            self.sched_holders.remove(core);
        }
    }

    fn set_irq_holder(&mut self, core: CoreId, held: bool) {
        if held {
            insert_core(&mut self.irq_holders, core);
        } else {
            self.irq_holders.remove(core);
        }
    }
}

fn insert_core(set: &mut CpuSet, core: CoreId) {
    // Core indices are validated against MAX_CORES at scheduler construction.
    let inserted = set.insert(core);
    debug_assert!(inserted.is_ok(), "{} out of range", core);
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{Priority, TaskId};

    fn running(lock_count: u16, irq_count: u16) -> TaskControlRecord {
        let mut tcr = TaskControlRecord::new(TaskId::new(), Priority(10));
        tcr.lock_count = lock_count;
        tcr.irq_count = irq_count;
        tcr
    }

    #[test]
    fn test_unlocked_by_default() {
        let lock = PreemptionLock::new();
        assert!(!lock.is_sched_locked());
        assert!(!lock.is_locked_for(CoreId(0)));
        assert!(!lock.defers(CoreId(0), CoreId(1)));
    }

    #[test]
    fn test_holder_may_schedule_for_itself() {
        let mut lock = PreemptionLock::new();
        lock.sync_with(CoreId(0), &running(1, 0));

        assert!(lock.is_sched_locked());
        assert!(!lock.is_locked_for(CoreId(0)));
        assert!(lock.is_locked_for(CoreId(1)));
    }

    #[test]
    fn test_irq_holder_asymmetry() {
        let mut lock = PreemptionLock::new();
        lock.sync_with(CoreId(1), &running(0, 1));

        assert!(!lock.is_locked_for(CoreId(1)));
        assert!(lock.is_locked_for(CoreId(0)));
        // A decision on core 0 about core 1 goes through: core 1 is the holder.
        assert!(!lock.defers(CoreId(0), CoreId(1)));
        assert!(lock.defers(CoreId(0), CoreId(2)));
    }

    #[test]
    fn test_shared_irq_lock_exempts_nobody() {
        let mut lock = PreemptionLock::new();
        lock.sync_with(CoreId(0), &running(0, 1));
        lock.sync_with(CoreId(2), &running(0, 1));

        assert!(lock.irq_locked_for(CoreId(0)));
        assert!(lock.irq_locked_for(CoreId(2)));
        assert!(lock.is_locked_for(CoreId(0)));
        // Core 2 masks interrupts and is neither the caller nor the target.
        assert!(lock.defers(CoreId(0), CoreId(1)));
        assert!(!lock.defers(CoreId(0), CoreId(2)));
    }

    #[test]
    fn test_sync_clears_bits_for_unlocked_task() {
        let mut lock = PreemptionLock::new();
        lock.sync_with(CoreId(2), &running(2, 3));
        assert!(lock.holds_sched(CoreId(2)));
        assert!(lock.holds_irq(CoreId(2)));

        lock.sync_with(CoreId(2), &running(0, 0));
        assert!(!lock.holds_sched(CoreId(2)));
        assert!(!lock.holds_irq(CoreId(2)));
    }

    #[test]
    fn test_lock_total_tracks_acquire_release() {
        let mut lock = PreemptionLock::new();
        lock.acquired();
        lock.acquired();
        lock.released();
        assert_eq!(lock.lock_total(), 1);
    }
}
