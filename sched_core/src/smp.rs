//! Multiprocessor Scheduler
//!
//! One run queue per core, a shared pool of ready-but-unbound tasks and the
//! pending queue.
//!
//! ## Design
//!
//! - The head of each run queue is that core's running task; the entries
//!   behind it are ASSIGNED tasks hard-bound to the core. The idle task of a
//!   core is hard-bound and sits at the tail.
//! - A task that is not hard-bound only stays in a run queue while it runs.
//!   When displaced it moves out to the ready pool (or the pending queue
//!   while the scheduler is locked).
//! - A newly runnable task targets the eligible core whose running task has
//!   the lowest priority, ties going to the lowest core index.
//! - Mutating another core's run queue happens between a pause and a resume
//!   of that core, through the injected [`CrossCorePauseResume`] seam.
//!
//! There is no global priority ordering across cores: a READY task may wait
//! in the pool while a lower-priority task runs on a core it cannot use.
//! Likewise a displaced unbound task always goes to the pool, even when
//! another core in its affinity is idle; it is picked up when a core it may
//! use frees up or a lock is released.

use crate::audit::{SchedAuditLog, SchedEvent};
use crate::config::SchedulerConfig;
use crate::error::{InvariantViolation, SchedError};
use crate::lock::PreemptionLock;
use crate::queue::{QueueKind, TaskQueue};
use crate::task::{TaskControlRecord, TaskHandle, TaskState, TaskTable};
use crate::verify;
use alloc::vec::Vec;
use core_types::{CoreId, CpuSet, Priority};
use hal::{CpuHal, CrossCorePauseResume, PauseAck};

/// Where a newly runnable task is headed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Placement {
    target: CoreId,
    desired: TaskState,
    deferred: bool,
}

/// Multiprocessor scheduler context
///
/// `P` supplies the calling core's index and the cross-core pause/resume
/// protocol.
pub struct SmpScheduler<P> {
    config: SchedulerConfig,
    platform: P,
    tasks: TaskTable,
    run_queues: Vec<TaskQueue>,
    ready: TaskQueue,
    pending: TaskQueue,
    lock: PreemptionLock,
    audit_log: SchedAuditLog,
}

impl<P> SmpScheduler<P>
where
    P: CpuHal + CrossCorePauseResume,
{
    /// Creates the scheduler with one running idle task per core
    pub fn new(config: SchedulerConfig, platform: P) -> Result<Self, SchedError> {
        config.validate()?;
        let mut tasks = TaskTable::with_idle_tasks(config.task_capacity, config.core_count);
        let mut run_queues = Vec::with_capacity(config.core_count);
        for core in 0..config.core_count {
            let mut queue = TaskQueue::new(QueueKind::Run(CoreId(core)));
            queue.insert_ordered(&mut tasks, TaskHandle::new(core));
            run_queues.push(queue);
        }
        let audit_log = SchedAuditLog::new(config.audit_capacity);
        Ok(Self {
            config,
            platform,
            tasks,
            run_queues,
            ready: TaskQueue::new(QueueKind::Ready),
            pending: TaskQueue::new(QueueKind::Pending),
            lock: PreemptionLock::new(),
            audit_log,
        })
    }

    /// Registers a task; it starts BLOCKED and outside every queue
    ///
    /// Rejects tasks no online core could ever run, so the entry point never
    /// meets an empty candidate set.
    pub fn spawn(&mut self, tcr: TaskControlRecord) -> Result<TaskHandle, SchedError> {
        if tcr.priority() <= Priority::IDLE {
            return Err(SchedError::InvalidPriority(tcr.priority()));
        }
        let eligible = if tcr.is_core_locked() {
            self.online().contains(tcr.owning_core())
        } else {
            !tcr.affinity().intersection(self.online()).is_empty()
        };
        if !eligible {
            return Err(SchedError::NoEligibleCore(tcr.affinity()));
        }
        self.tasks.insert(tcr)
    }

    /// Frees a blocked task's record
    pub fn release(&mut self, task: TaskHandle) -> Result<TaskControlRecord, SchedError> {
        self.tasks.remove(task)
    }

    /// Makes a task that just stopped waiting runnable
    ///
    /// Must be called with the calling core's interrupts masked. Returns true
    /// iff the calling core's running task changed; effects on other cores
    /// are completed before returning.
    pub fn make_runnable_smp(&mut self, task: TaskHandle) -> bool {
        let switched = self.add_ready_to_run(task);
        self.debug_verify();
        switched
    }

    /// Takes a task out of the scheduler's queues (it is about to block)
    ///
    /// Returns true iff the calling core's running task changed.
    pub fn remove_runnable(&mut self, task: TaskHandle) -> bool {
        let switched = self.remove_from_queues(task);
        self.debug_verify();
        switched
    }

    /// Raises the preemption lock of the calling core's running task
    pub fn lock_preemption(&mut self) {
        let me = self.platform.this_cpu();
        let current = self.running_task(me);
        self.tasks[current].lock_count += 1;
        self.lock.acquired();
        self.lock.sync_with(me, &self.tasks[current]);
    }

    /// Drops one level of the calling core's preemption lock
    ///
    /// Releasing the last level merges deferred tasks and dispatches pool
    /// tasks held back by the lock. Returns true iff that changed this core's
    /// running task.
    pub fn unlock_preemption(&mut self) -> bool {
        let me = self.platform.this_cpu();
        let current = self.running_task(me);
        debug_assert!(self.tasks[current].lock_count > 0, "unbalanced unlock");
        if self.tasks[current].lock_count == 0 {
            return false;
        }
        self.tasks[current].lock_count -= 1;
        self.lock.released();
        self.lock.sync_with(me, &self.tasks[current]);

        let switched = if self.tasks[current].lock_count == 0 {
            self.release_deferred()
        } else {
            false
        };
        self.debug_verify();
        switched
    }

    /// Enters a critical section on behalf of the calling core's running task
    pub fn enter_critical(&mut self) {
        let me = self.platform.this_cpu();
        let current = self.running_task(me);
        self.tasks[current].irq_count += 1;
        self.lock.sync_with(me, &self.tasks[current]);
    }

    /// Leaves one level of the calling core's critical section
    pub fn leave_critical(&mut self) -> bool {
        let me = self.platform.this_cpu();
        let current = self.running_task(me);
        debug_assert!(self.tasks[current].irq_count > 0, "unbalanced leave");
        if self.tasks[current].irq_count == 0 {
            return false;
        }
        self.tasks[current].irq_count -= 1;
        self.lock.sync_with(me, &self.tasks[current]);

        let switched = if self.tasks[current].irq_count == 0 {
            self.release_deferred()
        } else {
            false
        };
        self.debug_verify();
        switched
    }

    /// Re-offers pending tasks, highest priority first
    ///
    /// Stops at the first task that would be deferred again. Returns true iff
    /// the calling core's running task changed.
    pub fn merge_pending(&mut self) -> bool {
        let me = self.platform.this_cpu();
        let mut switched = false;
        let mut merged = 0;
        while let Some(next) = self.pending.head() {
            if self.placement(me, next).deferred {
                break;
            }
            self.pending.remove(&mut self.tasks, next);
            self.tasks[next].state = TaskState::Blocked;
            switched |= self.add_ready_to_run(next);
            merged += 1;
        }
        if merged > 0 {
            self.audit_log
                .record(SchedEvent::PendingMerged { count: merged });
        }
        switched
    }

    /// Dispatches every pool task that outranks the running task of a core
    /// it may use
    ///
    /// Catches up on pulls skipped while a lock was held. Returns true iff
    /// the calling core's running task changed.
    pub fn dispatch_ready(&mut self) -> bool {
        let me = self.platform.this_cpu();
        let mut switched = false;
        // Each pass replaces a running task with a higher-priority one, so
        // the loop ends.
        loop {
            let next = self.ready.iter(&self.tasks).find(|&handle| {
                let placement = self.placement(me, handle);
                placement.desired == TaskState::Running && !placement.deferred
            });
            let Some(task) = next else {
                break;
            };
            self.ready.remove(&mut self.tasks, task);
            self.tasks[task].state = TaskState::Blocked;
            switched |= self.add_ready_to_run(task);
        }
        switched
    }

    /// Picks the eligible core running the lowest-priority task
    ///
    /// Ties go to the lowest core index. `None` when `affinity` names no
    /// online core.
    pub fn select_core(&self, affinity: CpuSet) -> Option<CoreId> {
        let mut best: Option<(CoreId, Priority)> = None;
        for core in affinity.intersection(self.online()) {
            let priority = self.tasks[self.running_task(core)].priority();
            match best {
                Some((_, lowest)) if lowest <= priority => {}
                _ => best = Some((core, priority)),
            }
        }
        best.map(|(core, _)| core)
    }

    /// The running task of `core` (head of its run queue)
    pub fn running_task(&self, core: CoreId) -> TaskHandle {
        match self.run_queues[core.0].head() {
            Some(head) => head,
            None => unreachable!("{} lost its idle task", core),
        }
    }

    /// The idle task bound to `core`
    pub fn idle_task(&self, core: CoreId) -> TaskHandle {
        debug_assert!(core.0 < self.config.core_count);
        TaskHandle::new(core.0)
    }

    pub fn core_count(&self) -> usize {
        self.config.core_count
    }

    /// All online cores
    pub fn online(&self) -> CpuSet {
        CpuSet::first(self.config.core_count)
    }

    pub fn task(&self, task: TaskHandle) -> Option<&TaskControlRecord> {
        self.tasks.get(task)
    }

    pub fn task_state(&self, task: TaskHandle) -> Option<TaskState> {
        self.tasks.get(task).map(TaskControlRecord::state)
    }

    pub fn tasks(&self) -> &TaskTable {
        &self.tasks
    }

    /// Run queue snapshot for `core`, running task first
    pub fn run_queue(&self, core: CoreId) -> Vec<TaskHandle> {
        self.run_queues[core.0].handles(&self.tasks)
    }

    /// Ready pool snapshot, highest priority first
    pub fn ready_queue(&self) -> Vec<TaskHandle> {
        self.ready.handles(&self.tasks)
    }

    /// Pending queue snapshot, highest priority first
    pub fn pending_queue(&self) -> Vec<TaskHandle> {
        self.pending.handles(&self.tasks)
    }

    pub fn lock(&self) -> &PreemptionLock {
        &self.lock
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    /// Returns a reference to the audit log
    pub fn audit_log(&self) -> &SchedAuditLog {
        &self.audit_log
    }

    pub fn clear_audit_log(&mut self) {
        self.audit_log.clear();
    }

    /// Checks every queue invariant
    pub fn verify(&self) -> Result<(), InvariantViolation> {
        for (index, queue) in self.run_queues.iter().enumerate() {
            let core = CoreId(index);
            if queue.is_empty() {
                return Err(InvariantViolation::EmptyRunQueue(core));
            }
            verify::walk_queue(&self.tasks, queue, |position, handle, tcr| {
                let expected = if position == 0 {
                    TaskState::Running
                } else {
                    TaskState::Assigned
                };
                if tcr.state() != expected || tcr.owning_core() != core {
                    return Err(InvariantViolation::StateMismatch {
                        queue: queue.kind(),
                        task: handle,
                        state: tcr.state(),
                    });
                }
                if position > 0 && !tcr.is_core_locked() {
                    return Err(InvariantViolation::StateMismatch {
                        queue: queue.kind(),
                        task: handle,
                        state: tcr.state(),
                    });
                }
                Ok(())
            })?;
        }
        verify::walk_queue(&self.tasks, &self.ready, |_, handle, tcr| {
            if tcr.is_core_locked() {
                return Err(InvariantViolation::LockedTaskMisplaced {
                    task: handle,
                    queue: QueueKind::Ready,
                });
            }
            if tcr.state() != TaskState::Ready {
                return Err(InvariantViolation::StateMismatch {
                    queue: QueueKind::Ready,
                    task: handle,
                    state: tcr.state(),
                });
            }
            Ok(())
        })?;
        verify::walk_queue(&self.tasks, &self.pending, |_, handle, tcr| {
            if tcr.state() != TaskState::Pending {
                return Err(InvariantViolation::StateMismatch {
                    queue: QueueKind::Pending,
                    task: handle,
                    state: tcr.state(),
                });
            }
            Ok(())
        })?;
        verify::check_membership(&self.tasks)?;
        let running = (0..self.config.core_count).map(|core| {
            let core = CoreId(core);
            (core, self.running_task(core))
        });
        verify::check_lock_holders(&self.tasks, &self.lock, running)
    }

    fn release_deferred(&mut self) -> bool {
        let merged = self.merge_pending();
        self.dispatch_ready() | merged
    }

    fn placement(&self, me: CoreId, task: TaskHandle) -> Placement {
        let tcr = &self.tasks[task];
        let target = if tcr.is_core_locked() {
            tcr.owning_core()
        } else {
            match self.select_core(tcr.affinity()) {
                Some(core) => core,
                None => panic!(
                    "no online core eligible for {} (affinity {})",
                    tcr.id(),
                    tcr.affinity()
                ),
            }
        };

        let current = &self.tasks[self.running_task(target)];
        let desired = if current.priority() < tcr.priority() {
            TaskState::Running
        } else if tcr.is_core_locked() {
            TaskState::Assigned
        } else {
            TaskState::Ready
        };

        // Displacing a lock holder always waits, even on the holder's own core.
        let deferred = desired != TaskState::Assigned
            && (self.lock.defers(me, target)
                || (desired == TaskState::Running && self.lock.holds_sched(target)));

        Placement {
            target,
            desired,
            deferred,
        }
    }

    fn add_ready_to_run(&mut self, task: TaskHandle) -> bool {
        debug_assert!(self.tasks[task].queue().is_none(), "{} already queued", task);
        let me = self.platform.this_cpu();
        let Placement {
            target,
            desired,
            deferred,
        } = self.placement(me, task);
        let id = self.tasks[task].id();

        if deferred {
            self.pending.insert_ordered(&mut self.tasks, task);
            self.tasks[task].state = TaskState::Pending;
            self.audit_log.record(SchedEvent::Deferred { task: id });
            return false;
        }

        if desired == TaskState::Ready {
            self.ready.insert_ordered(&mut self.tasks, task);
            self.tasks[task].state = TaskState::Ready;
            self.audit_log.record(SchedEvent::Ready { task: id });
            return false;
        }

        let ack = if target != me {
            Some(self.pause(target))
        } else {
            None
        };

        let previous = self.running_task(target);
        let switched = if self.run_queues[target.0].insert_ordered(&mut self.tasks, task) {
            debug_assert_eq!(desired, TaskState::Running);
            let tcr = &mut self.tasks[task];
            tcr.owning_core = target;
            tcr.state = TaskState::Running;
            self.lock.sync_with(target, &self.tasks[task]);

            self.audit_log.record(SchedEvent::Preempted {
                core: target,
                task: self.tasks[previous].id(),
            });
            self.audit_log
                .record(SchedEvent::Running { core: target, task: id });
            self.demote(me, target, previous);
            true
        } else {
            debug_assert_eq!(desired, TaskState::Assigned);
            let tcr = &mut self.tasks[task];
            tcr.owning_core = target;
            tcr.state = TaskState::Assigned;
            self.audit_log
                .record(SchedEvent::Assigned { core: target, task: id });
            false
        };

        match ack {
            Some(ack) => {
                self.resume(ack);
                false
            }
            None => switched,
        }
    }

    /// Moves a displaced task off the head position of `core`'s run queue
    fn demote(&mut self, me: CoreId, core: CoreId, displaced: TaskHandle) {
        let id = self.tasks[displaced].id();
        let to = if self.tasks[displaced].is_core_locked() {
            debug_assert_eq!(self.tasks[displaced].owning_core(), core);
            TaskState::Assigned
        } else {
            self.run_queues[core.0].remove(&mut self.tasks, displaced);
            if self.lock.is_sched_locked() || self.lock.irq_locked_for(me) {
                self.pending.insert_ordered(&mut self.tasks, displaced);
                TaskState::Pending
            } else {
                self.ready.insert_ordered(&mut self.tasks, displaced);
                TaskState::Ready
            }
        };
        self.tasks[displaced].state = to;
        self.audit_log
            .record(SchedEvent::Demoted { core, task: id, to });
    }

    fn remove_from_queues(&mut self, task: TaskHandle) -> bool {
        // The idle task never blocks.
        if self.tasks[task].is_idle() {
            return false;
        }
        let me = self.platform.this_cpu();
        let Some(queue) = self.tasks[task].queue() else {
            return false;
        };

        let core = match queue {
            QueueKind::Ready => {
                self.ready.remove(&mut self.tasks, task);
                self.mark_removed(task);
                return false;
            }
            QueueKind::Pending => {
                self.pending.remove(&mut self.tasks, task);
                self.mark_removed(task);
                return false;
            }
            QueueKind::Run(core) => core,
        };

        let ack = if core != me {
            Some(self.pause(core))
        } else {
            None
        };

        let was_running = self.run_queues[core.0].head() == Some(task);
        self.run_queues[core.0].remove(&mut self.tasks, task);
        self.mark_removed(task);

        if was_running {
            self.lock.clear_core(core);
            let mut next = self.running_task(core);

            if !self.lock.is_sched_locked() && !self.lock.irq_locked_for(me) {
                if let Some(candidate) = self.ready_candidate(core) {
                    if self.tasks[candidate].priority() > self.tasks[next].priority() {
                        self.ready.remove(&mut self.tasks, candidate);
                        let at_head =
                            self.run_queues[core.0].insert_ordered(&mut self.tasks, candidate);
                        debug_assert!(at_head);
                        next = candidate;
                    }
                }
            }

            let tcr = &mut self.tasks[next];
            tcr.owning_core = core;
            tcr.state = TaskState::Running;
            self.lock.sync_with(core, &self.tasks[next]);
            self.audit_log.record(SchedEvent::Running {
                core,
                task: self.tasks[next].id(),
            });
        }

        let mut switched = was_running && core == me;
        if let Some(ack) = ack {
            self.resume(ack);
        }

        if was_running && !self.pending.is_empty() && !self.lock.is_locked_for(me) {
            switched |= self.merge_pending();
        }
        switched
    }

    /// Highest-priority pool task allowed on `core`
    fn ready_candidate(&self, core: CoreId) -> Option<TaskHandle> {
        self.ready
            .iter(&self.tasks)
            .find(|&handle| self.tasks[handle].affinity().contains(core))
    }

    fn mark_removed(&mut self, task: TaskHandle) {
        self.tasks[task].state = TaskState::Blocked;
        self.audit_log.record(SchedEvent::Removed {
            task: self.tasks[task].id(),
        });
    }

    fn pause(&mut self, core: CoreId) -> PauseAck {
        let ack = self.platform.pause(core);
        debug_assert_eq!(ack.core(), core);
        self.audit_log.record(SchedEvent::CorePaused { core });
        ack
    }

    fn resume(&mut self, ack: PauseAck) {
        self.audit_log
            .record(SchedEvent::CoreResumed { core: ack.core() });
        self.platform.resume(ack);
    }

    fn debug_verify(&self) {
        #[cfg(debug_assertions)]
        if let Err(violation) = self.verify() {
            panic!("scheduler invariant violated: {}", violation);
        }
    }
}
