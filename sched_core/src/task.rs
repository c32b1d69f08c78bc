//! Task control records and the task arena
//!
//! Control records live in a fixed-capacity arena and are addressed by
//! [`TaskHandle`]s. Queue links are handles too, so a record is reachable
//! from at most one queue without any pointer aliasing.

use crate::error::SchedError;
use crate::queue::QueueKind;
use alloc::vec::Vec;
use core::fmt;
use core::ops::{Index, IndexMut};
use core_types::{CoreId, CpuSet, Priority, TaskId, MAX_CORES};
use serde::{Deserialize, Serialize};

/// Base for the deterministic idle task identifiers
const IDLE_ID_BASE: u128 = 0x1d1e_0000;

/// Stable index of a task control record in the [`TaskTable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskHandle(u32);

impl TaskHandle {
    pub(crate) fn new(index: usize) -> Self {
        Self(index as u32)
    }

    /// Returns the arena slot index
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskHandle({})", self.0)
    }
}

/// Scheduling state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// Head of a ready/run queue: executing on its core
    Running,
    /// Bound to a core's run queue behind the running task
    Assigned,
    /// Runnable, waiting to be dispatched
    Ready,
    /// Runnable, deferred by a preemption lock
    Pending,
    /// Waiting on something outside the scheduler, or not started yet
    Blocked,
}

impl TaskState {
    /// Returns true for every state that requires queue membership
    pub fn is_runnable(self) -> bool {
        !matches!(self, TaskState::Blocked)
    }
}

/// Queue membership links; only the queue primitive touches these
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Links {
    pub(crate) next: Option<TaskHandle>,
    pub(crate) prev: Option<TaskHandle>,
    pub(crate) queue: Option<QueueKind>,
}

/// Per-task scheduling record
#[derive(Debug, Clone)]
pub struct TaskControlRecord {
    id: TaskId,
    priority: Priority,
    pub(crate) state: TaskState,
    pub(crate) owning_core: CoreId,
    core_locked: bool,
    affinity: CpuSet,
    pub(crate) lock_count: u16,
    pub(crate) irq_count: u16,
    pub(crate) links: Links,
}

impl TaskControlRecord {
    /// Creates a blocked record that may run on any core
    pub fn new(id: TaskId, priority: Priority) -> Self {
        Self {
            id,
            priority,
            state: TaskState::Blocked,
            owning_core: CoreId(0),
            core_locked: false,
            affinity: CpuSet::first(MAX_CORES),
            lock_count: 0,
            irq_count: 0,
            links: Links::default(),
        }
    }

    /// Restricts the cores this task may migrate between
    pub fn with_affinity(mut self, affinity: CpuSet) -> Self {
        self.affinity = affinity;
        self
    }

    /// Binds the task to one core for its whole life
    pub fn locked_to(mut self, core: CoreId) -> Self {
        self.core_locked = true;
        self.owning_core = core;
        self
    }

    pub(crate) fn idle(core: CoreId) -> Self {
        let mut tcr = Self::new(
            TaskId::from_u128(IDLE_ID_BASE + core.0 as u128),
            Priority::IDLE,
        )
        .locked_to(core);
        tcr.state = TaskState::Running;
        tcr
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Core the task runs on or is queued for
    ///
    /// Meaningful while the task is RUNNING or ASSIGNED, and for core-locked
    /// tasks, where it names the bound core.
    pub fn owning_core(&self) -> CoreId {
        self.owning_core
    }

    pub fn is_core_locked(&self) -> bool {
        self.core_locked
    }

    pub fn affinity(&self) -> CpuSet {
        self.affinity
    }

    /// Preemption lock nesting depth held by this task
    pub fn lock_count(&self) -> u16 {
        self.lock_count
    }

    /// Critical section nesting depth held by this task
    pub fn irq_count(&self) -> u16 {
        self.irq_count
    }

    /// The queue currently holding this task, if any
    pub fn queue(&self) -> Option<QueueKind> {
        self.links.queue
    }

    pub fn is_idle(&self) -> bool {
        self.priority.is_idle()
    }
}

/// Fixed-capacity arena of task control records
///
/// Slots are allocated once at kernel init. The first `core_count` slots
/// hold the idle tasks, so `TaskHandle::new(core)` is core `core`'s idle task.
#[derive(Debug)]
pub struct TaskTable {
    slots: Vec<Option<TaskControlRecord>>,
    live: usize,
}

impl TaskTable {
    pub(crate) fn with_idle_tasks(capacity: usize, core_count: usize) -> Self {
        let capacity = capacity.max(core_count);
        let mut slots = Vec::with_capacity(capacity);
        for core in 0..core_count {
            slots.push(Some(TaskControlRecord::idle(CoreId(core))));
        }
        slots.resize_with(capacity, || None);
        Self {
            slots,
            live: core_count,
        }
    }

    /// Stores a record and returns its handle
    pub fn insert(&mut self, tcr: TaskControlRecord) -> Result<TaskHandle, SchedError> {
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(SchedError::TaskTableFull(self.slots.len()))?;
        self.slots[index] = Some(tcr);
        self.live += 1;
        Ok(TaskHandle::new(index))
    }

    /// Frees a slot; only blocked, unqueued tasks may leave the table
    pub fn remove(&mut self, task: TaskHandle) -> Result<TaskControlRecord, SchedError> {
        let slot = self
            .slots
            .get_mut(task.index())
            .ok_or(SchedError::UnknownTask(task))?;
        let tcr = slot.as_ref().ok_or(SchedError::UnknownTask(task))?;
        if tcr.state.is_runnable() || tcr.links.queue.is_some() {
            return Err(SchedError::TaskStillQueued(task));
        }
        let tcr = slot.take().ok_or(SchedError::UnknownTask(task))?;
        self.live -= 1;
        Ok(tcr)
    }

    pub fn get(&self, task: TaskHandle) -> Option<&TaskControlRecord> {
        self.slots.get(task.index()).and_then(Option::as_ref)
    }

    pub(crate) fn get_mut(&mut self, task: TaskHandle) -> Option<&mut TaskControlRecord> {
        self.slots.get_mut(task.index()).and_then(Option::as_mut)
    }

    pub fn contains(&self, task: TaskHandle) -> bool {
        self.get(task).is_some()
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Iterates live records in slot order
    pub fn iter(&self) -> impl Iterator<Item = (TaskHandle, &TaskControlRecord)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|tcr| (TaskHandle::new(index), tcr)))
    }
}

impl Index<TaskHandle> for TaskTable {
    type Output = TaskControlRecord;

    fn index(&self, task: TaskHandle) -> &TaskControlRecord {
        match self.get(task) {
            Some(tcr) => tcr,
            None => panic!("stale task handle {}", task),
        }
    }
}

impl IndexMut<TaskHandle> for TaskTable {
    fn index_mut(&mut self, task: TaskHandle) -> &mut TaskControlRecord {
        match self.get_mut(task) {
            Some(tcr) => tcr,
            None => panic!("stale task handle {}", task),
        }
    }
}
