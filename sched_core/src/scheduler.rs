//! Uniprocessor Scheduler
//!
//! One ready queue whose head is the running task, plus a pending queue for
//! arrivals held back by the preemption lock.
//!
//! ## Design
//!
//! - **Strict fixed priority**: the highest-priority runnable task runs;
//!   equal priorities run in arrival order.
//! - **No hidden yields**: every entry point returns whether the running task
//!   changed, and the caller performs the context switch.
//! - **Interrupt-safe**: callers mask interrupts; nothing here blocks or
//!   allocates.
//!
//! The idle task sits at the tail of the ready queue for the scheduler's
//! whole life, so the queue always has a head.

use crate::audit::{SchedAuditLog, SchedEvent};
use crate::config::SchedulerConfig;
use crate::error::{InvariantViolation, SchedError};
use crate::lock::PreemptionLock;
use crate::queue::{QueueKind, TaskQueue};
use crate::task::{TaskControlRecord, TaskHandle, TaskState, TaskTable};
use crate::verify;
use alloc::vec::Vec;
use core_types::{CoreId, Priority};

const CORE: CoreId = CoreId(0);

/// Uniprocessor scheduler context
///
/// Created once at kernel init and never torn down.
pub struct UpScheduler {
    config: SchedulerConfig,
    tasks: TaskTable,
    ready: TaskQueue,
    pending: TaskQueue,
    lock: PreemptionLock,
    audit_log: SchedAuditLog,
}

impl UpScheduler {
    /// Creates a scheduler with the default configuration
    pub fn new() -> Self {
        Self::build(SchedulerConfig::default())
    }

    /// Creates a scheduler with a custom configuration
    pub fn with_config(config: SchedulerConfig) -> Result<Self, SchedError> {
        config.validate()?;
        if config.core_count != 1 {
            return Err(SchedError::InvalidCoreCount(config.core_count));
        }
        Ok(Self::build(config))
    }

    fn build(config: SchedulerConfig) -> Self {
        let mut tasks = TaskTable::with_idle_tasks(config.task_capacity, 1);
        let mut ready = TaskQueue::new(QueueKind::Ready);
        ready.insert_ordered(&mut tasks, TaskHandle::new(0));
        let audit_log = SchedAuditLog::new(config.audit_capacity);
        Self {
            config,
            tasks,
            ready,
            pending: TaskQueue::new(QueueKind::Pending),
            lock: PreemptionLock::new(),
            audit_log,
        }
    }

    /// Registers a task; it starts BLOCKED and outside every queue
    pub fn spawn(&mut self, tcr: TaskControlRecord) -> Result<TaskHandle, SchedError> {
        if tcr.priority() <= Priority::IDLE {
            return Err(SchedError::InvalidPriority(tcr.priority()));
        }
        let eligible = if tcr.is_core_locked() {
            tcr.owning_core() == CORE
        } else {
            tcr.affinity().contains(CORE)
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
    /// Returns true iff `task` preempted the running task; the caller must
    /// then switch context before leaving its critical section.
    pub fn make_runnable(&mut self, task: TaskHandle) -> bool {
        let switched = self.add_ready_to_run(task);
        self.debug_verify();
        switched
    }

    /// Takes a task out of the scheduler's queues (it is about to block)
    ///
    /// Returns true iff the running task changed.
    pub fn remove_runnable(&mut self, task: TaskHandle) -> bool {
        let switched = self.remove_from_queues(task);
        self.debug_verify();
        switched
    }

    /// Raises the running task's preemption lock
    pub fn lock_preemption(&mut self) {
        let current = self.current_task();
        self.tasks[current].lock_count += 1;
        self.lock.acquired();
        self.lock.sync_with(CORE, &self.tasks[current]);
    }

    /// Drops one level of the running task's preemption lock
    ///
    /// Releasing the last level lets deferred tasks in. Returns true iff the
    /// running task changed as a result.
    pub fn unlock_preemption(&mut self) -> bool {
        let current = self.current_task();
        debug_assert!(self.tasks[current].lock_count > 0, "unbalanced unlock");
        if self.tasks[current].lock_count == 0 {
            return false;
        }
        self.tasks[current].lock_count -= 1;
        self.lock.released();
        self.lock.sync_with(CORE, &self.tasks[current]);

        let switched = if self.tasks[current].lock_count == 0 {
            self.merge_pending()
        } else {
            false
        };
        self.debug_verify();
        switched
    }

    /// Enters a critical section on behalf of the running task
    pub fn enter_critical(&mut self) {
        let current = self.current_task();
        self.tasks[current].irq_count += 1;
        self.lock.sync_with(CORE, &self.tasks[current]);
    }

    /// Leaves one level of the running task's critical section
    pub fn leave_critical(&mut self) -> bool {
        let current = self.current_task();
        debug_assert!(self.tasks[current].irq_count > 0, "unbalanced leave");
        if self.tasks[current].irq_count == 0 {
            return false;
        }
        self.tasks[current].irq_count -= 1;
        self.lock.sync_with(CORE, &self.tasks[current]);

        let switched = if self.tasks[current].irq_count == 0 {
            self.merge_pending()
        } else {
            false
        };
        self.debug_verify();
        switched
    }

    /// Re-offers pending tasks, highest priority first
    ///
    /// Stops at the first task the running task's lock would defer again.
    /// Returns true iff the running task changed.
    pub fn merge_pending(&mut self) -> bool {
        let mut switched = false;
        let mut merged = 0;
        while let Some(next) = self.pending.head() {
            if self.defers(next) {
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

    /// The running task (head of the ready queue)
    pub fn current_task(&self) -> TaskHandle {
        match self.ready.head() {
            Some(head) => head,
            None => unreachable!("ready queue lost its idle task"),
        }
    }

    /// The idle task
    pub fn idle_task(&self) -> TaskHandle {
        TaskHandle::new(0)
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

    /// Ready queue snapshot, running task first
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

    /// Returns a reference to the audit log
    pub fn audit_log(&self) -> &SchedAuditLog {
        &self.audit_log
    }

    pub fn clear_audit_log(&mut self) {
        self.audit_log.clear();
    }

    /// Checks every queue invariant
    pub fn verify(&self) -> Result<(), InvariantViolation> {
        verify::walk_queue(&self.tasks, &self.ready, |position, handle, tcr| {
            let expected = if position == 0 {
                TaskState::Running
            } else {
                TaskState::Ready
            };
            if tcr.state() != expected {
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
        let current = self
            .ready
            .head()
            .ok_or(InvariantViolation::EmptyRunQueue(CORE))?;
        verify::check_lock_holders(&self.tasks, &self.lock, [(CORE, current)])
    }

    fn defers(&self, task: TaskHandle) -> bool {
        let current = &self.tasks[self.current_task()];
        current.lock_count > 0 && self.tasks[task].priority() > current.priority()
    }

    fn add_ready_to_run(&mut self, task: TaskHandle) -> bool {
        let current = self.current_task();
        let id = self.tasks[task].id();

        if self.defers(task) {
            self.pending.insert_ordered(&mut self.tasks, task);
            self.tasks[task].state = TaskState::Pending;
            self.audit_log.record(SchedEvent::Deferred { task: id });
            false
        } else if self.ready.insert_ordered(&mut self.tasks, task) {
            self.tasks[current].state = TaskState::Ready;
            let tcr = &mut self.tasks[task];
            tcr.state = TaskState::Running;
            tcr.owning_core = CORE;
            self.lock.sync_with(CORE, &self.tasks[task]);

            self.audit_log.record(SchedEvent::Preempted {
                core: CORE,
                task: self.tasks[current].id(),
            });
            self.audit_log
                .record(SchedEvent::Running { core: CORE, task: id });
            true
        } else {
            self.tasks[task].state = TaskState::Ready;
            self.audit_log.record(SchedEvent::Ready { task: id });
            false
        }
    }

    fn remove_from_queues(&mut self, task: TaskHandle) -> bool {
        // The idle task never blocks.
        if self.tasks[task].is_idle() {
            return false;
        }
        let Some(queue) = self.tasks[task].queue() else {
            return false;
        };
        let was_running = self.ready.head() == Some(task);

        match queue {
            QueueKind::Ready => self.ready.remove(&mut self.tasks, task),
            QueueKind::Pending => self.pending.remove(&mut self.tasks, task),
            QueueKind::Run(core) => unreachable!("run queue for {} in a uniprocessor build", core),
        }
        self.tasks[task].state = TaskState::Blocked;
        self.audit_log.record(SchedEvent::Removed {
            task: self.tasks[task].id(),
        });

        if !was_running {
            return false;
        }

        let next = self.current_task();
        let tcr = &mut self.tasks[next];
        tcr.state = TaskState::Running;
        tcr.owning_core = CORE;
        self.lock.sync_with(CORE, &self.tasks[next]);
        self.audit_log.record(SchedEvent::Running {
            core: CORE,
            task: self.tasks[next].id(),
        });

        if self.tasks[next].lock_count == 0 && !self.pending.is_empty() {
            self.merge_pending();
        }
        true
    }

    fn debug_verify(&self) {
        #[cfg(debug_assertions)]
        if let Err(violation) = self.verify() {
            panic!("scheduler invariant violated: {}", violation);
        }
    }
}

impl Default for UpScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::task;

    fn spawn_ready(scheduler: &mut UpScheduler, priority: u8) -> TaskHandle {
        let handle = scheduler.spawn(task(priority)).unwrap();
        scheduler.make_runnable(handle);
        handle
    }

    #[test]
    fn test_scheduler_creation() {
        let scheduler = UpScheduler::new();
        let idle = scheduler.idle_task();
        assert_eq!(scheduler.current_task(), idle);
        assert_eq!(scheduler.task_state(idle), Some(TaskState::Running));
        assert!(scheduler.pending_queue().is_empty());
        assert!(scheduler.verify().is_ok());
    }

    #[test]
    fn test_rejects_multiple_cores() {
        let result = UpScheduler::with_config(SchedulerConfig::smp(2));
        assert!(matches!(result, Err(SchedError::InvalidCoreCount(2))));
    }

    #[test]
    fn test_spawn_validates_priority_and_core() {
        let mut scheduler = UpScheduler::new();
        assert_eq!(
            scheduler.spawn(task(0)),
            Err(SchedError::InvalidPriority(Priority::IDLE))
        );
        assert!(matches!(
            scheduler.spawn(task(5).locked_to(CoreId(1))),
            Err(SchedError::NoEligibleCore(_))
        ));
        assert!(scheduler.spawn(task(5).locked_to(CoreId(0))).is_ok());
    }

    #[test]
    fn test_new_task_preempts_idle() {
        let mut scheduler = UpScheduler::new();
        let a = scheduler.spawn(task(10)).unwrap();

        assert!(scheduler.make_runnable(a));
        assert_eq!(scheduler.ready_queue(), vec![a, scheduler.idle_task()]);
        assert_eq!(
            scheduler.task_state(scheduler.idle_task()),
            Some(TaskState::Ready)
        );
    }

    #[test]
    fn test_higher_priority_preempts() {
        let mut scheduler = UpScheduler::new();
        let a = spawn_ready(&mut scheduler, 10);
        let b = scheduler.spawn(task(20)).unwrap();

        assert!(scheduler.make_runnable(b));
        assert_eq!(scheduler.current_task(), b);
        assert_eq!(scheduler.task_state(b), Some(TaskState::Running));
        assert_eq!(scheduler.task_state(a), Some(TaskState::Ready));
        assert_eq!(scheduler.ready_queue()[..2], [b, a]);
    }

    #[test]
    fn test_lock_defers_higher_priority() {
        let mut scheduler = UpScheduler::new();
        let a = spawn_ready(&mut scheduler, 10);
        scheduler.lock_preemption();
        let b = scheduler.spawn(task(20)).unwrap();

        assert!(!scheduler.make_runnable(b));
        assert_eq!(scheduler.current_task(), a);
        assert_eq!(scheduler.task_state(b), Some(TaskState::Pending));
        assert_eq!(scheduler.pending_queue(), vec![b]);
        assert!(!scheduler.ready_queue().contains(&b));
    }

    #[test]
    fn test_lock_does_not_defer_lower_priority() {
        let mut scheduler = UpScheduler::new();
        spawn_ready(&mut scheduler, 10);
        scheduler.lock_preemption();
        let low = scheduler.spawn(task(5)).unwrap();

        assert!(!scheduler.make_runnable(low));
        assert_eq!(scheduler.task_state(low), Some(TaskState::Ready));
        assert!(scheduler.pending_queue().is_empty());
    }

    #[test]
    fn test_equal_priority_queues_behind_running() {
        let mut scheduler = UpScheduler::new();
        let a = spawn_ready(&mut scheduler, 10);
        let c = scheduler.spawn(task(10)).unwrap();

        assert!(!scheduler.make_runnable(c));
        assert_eq!(scheduler.ready_queue()[..2], [a, c]);
        assert_eq!(scheduler.task_state(a), Some(TaskState::Running));
        assert_eq!(scheduler.task_state(c), Some(TaskState::Ready));
    }

    #[test]
    fn test_unlock_merges_pending() {
        let mut scheduler = UpScheduler::new();
        let a = spawn_ready(&mut scheduler, 10);
        scheduler.lock_preemption();
        let b = scheduler.spawn(task(20)).unwrap();
        let c = scheduler.spawn(task(15)).unwrap();
        scheduler.make_runnable(b);
        scheduler.make_runnable(c);
        assert_eq!(scheduler.pending_queue(), vec![b, c]);

        assert!(scheduler.unlock_preemption());
        assert!(scheduler.pending_queue().is_empty());
        assert_eq!(scheduler.ready_queue()[..3], [b, c, a]);
        assert_eq!(scheduler.task_state(b), Some(TaskState::Running));
        assert_eq!(scheduler.task_state(c), Some(TaskState::Ready));
        assert_eq!(scheduler.task_state(a), Some(TaskState::Ready));
    }

    #[test]
    fn test_nested_lock_keeps_deferring() {
        let mut scheduler = UpScheduler::new();
        spawn_ready(&mut scheduler, 10);
        scheduler.lock_preemption();
        scheduler.lock_preemption();
        let b = scheduler.spawn(task(20)).unwrap();
        scheduler.make_runnable(b);

        assert!(!scheduler.unlock_preemption());
        assert_eq!(scheduler.task_state(b), Some(TaskState::Pending));
        assert!(scheduler.unlock_preemption());
        assert_eq!(scheduler.current_task(), b);
        assert_eq!(scheduler.lock().lock_total(), 0);
    }

    #[test]
    fn test_remove_running_promotes_next() {
        let mut scheduler = UpScheduler::new();
        let a = spawn_ready(&mut scheduler, 10);
        let b = spawn_ready(&mut scheduler, 20);

        assert!(scheduler.remove_runnable(b));
        assert_eq!(scheduler.current_task(), a);
        assert_eq!(scheduler.task_state(a), Some(TaskState::Running));
        assert_eq!(scheduler.task_state(b), Some(TaskState::Blocked));
        assert_eq!(scheduler.task(b).unwrap().queue(), None);
    }

    #[test]
    fn test_remove_waiting_task_does_not_switch() {
        let mut scheduler = UpScheduler::new();
        let a = spawn_ready(&mut scheduler, 20);
        let b = spawn_ready(&mut scheduler, 10);

        assert!(!scheduler.remove_runnable(b));
        assert_eq!(scheduler.current_task(), a);
        assert!(!scheduler.remove_runnable(b));
    }

    #[test]
    fn test_blocking_lock_holder_merges_pending() {
        let mut scheduler = UpScheduler::new();
        let a = spawn_ready(&mut scheduler, 10);
        scheduler.lock_preemption();
        let b = scheduler.spawn(task(20)).unwrap();
        scheduler.make_runnable(b);

        assert!(scheduler.remove_runnable(a));
        assert_eq!(scheduler.current_task(), b);
        assert!(scheduler.pending_queue().is_empty());
        assert_eq!(scheduler.task(a).unwrap().lock_count(), 1);
        assert!(!scheduler.lock().is_sched_locked());
    }

    #[test]
    fn test_release_requires_blocked_task() {
        let mut scheduler = UpScheduler::new();
        let a = spawn_ready(&mut scheduler, 10);
        assert_eq!(
            scheduler.release(a).unwrap_err(),
            SchedError::TaskStillQueued(a)
        );
        scheduler.remove_runnable(a);
        assert!(scheduler.release(a).is_ok());
        assert_eq!(scheduler.task(a).map(|t| t.id()), None);
    }

    #[test]
    fn test_audit_log_preemption() {
        let mut scheduler = UpScheduler::new();
        let a = spawn_ready(&mut scheduler, 10);
        scheduler.clear_audit_log();
        let b = scheduler.spawn(task(20)).unwrap();
        scheduler.make_runnable(b);

        let a_id = scheduler.task(a).unwrap().id();
        let b_id = scheduler.task(b).unwrap().id();
        let log: Vec<&SchedEvent> = scheduler.audit_log().events().collect();
        assert_eq!(
            log,
            vec![
                &SchedEvent::Preempted {
                    core: CORE,
                    task: a_id
                },
                &SchedEvent::Running {
                    core: CORE,
                    task: b_id
                },
            ]
        );
    }

    #[test]
    fn test_critical_section_tracks_irq_holder() {
        let mut scheduler = UpScheduler::new();
        spawn_ready(&mut scheduler, 10);
        scheduler.enter_critical();
        assert!(scheduler.lock().holds_irq(CORE));
        assert!(!scheduler.leave_critical());
        assert!(!scheduler.lock().holds_irq(CORE));
    }

    #[test]
    fn test_removing_idle_task_is_ignored() {
        let mut scheduler = UpScheduler::new();
        let idle = scheduler.idle_task();

        assert!(!scheduler.remove_runnable(idle));
        assert_eq!(scheduler.current_task(), idle);
        assert_eq!(scheduler.task_state(idle), Some(TaskState::Running));
    }
}
