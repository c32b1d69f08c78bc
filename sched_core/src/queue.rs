//! Priority-ordered task queues
//!
//! A [`TaskQueue`] is a doubly-linked list threaded through the
//! [`TaskControlRecord`](crate::task::TaskControlRecord)s of a
//! [`TaskTable`]. Entries are kept in descending priority; equal priorities
//! keep arrival order. Insertion is a linear scan from the head, removal is
//! O(1). Nothing here allocates.

use crate::task::{TaskHandle, TaskTable};
use alloc::vec::Vec;
use core_types::CoreId;
use serde::{Deserialize, Serialize};

/// Which queue a task belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueKind {
    /// Uniprocessor ready queue, or the multiprocessor pool of unbound tasks
    Ready,
    /// Tasks deferred by a preemption lock
    Pending,
    /// A core's run queue; its head is the core's running task
    Run(CoreId),
}

/// Head/tail of an intrusive priority queue
#[derive(Debug, Clone)]
pub struct TaskQueue {
    kind: QueueKind,
    head: Option<TaskHandle>,
    tail: Option<TaskHandle>,
    len: usize,
}

impl TaskQueue {
    pub const fn new(kind: QueueKind) -> Self {
        Self {
            kind,
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    pub fn head(&self) -> Option<TaskHandle> {
        self.head
    }

    pub fn tail(&self) -> Option<TaskHandle> {
        self.tail
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inserts `task` after every entry of greater or equal priority
    ///
    /// Returns true iff `task` became the new head.
    pub fn insert_ordered(&mut self, tasks: &mut TaskTable, task: TaskHandle) -> bool {
        debug_assert!(
            tasks[task].links.queue.is_none(),
            "{} is already queued in {:?}",
            task,
            tasks[task].links.queue
        );
        let priority = tasks[task].priority();

        let mut cursor = self.head;
        while let Some(entry) = cursor {
            if tasks[entry].priority() < priority {
                break;
            }
            cursor = tasks[entry].links.next;
        }

        let prev = match cursor {
            Some(before) => tasks[before].links.prev,
            None => self.tail,
        };

        {
            let links = &mut tasks[task].links;
            links.prev = prev;
            links.next = cursor;
            links.queue = Some(self.kind);
        }
        match prev {
            Some(prev) => tasks[prev].links.next = Some(task),
            None => self.head = Some(task),
        }
        match cursor {
            Some(before) => tasks[before].links.prev = Some(task),
            None => self.tail = Some(task),
        }
        self.len += 1;

        self.head == Some(task)
    }

    /// Unlinks `task`, which must be a member of this queue
    pub fn remove(&mut self, tasks: &mut TaskTable, task: TaskHandle) {
        debug_assert_eq!(
            tasks[task].links.queue,
            Some(self.kind),
            "{} is not a member of {:?}",
            task,
            self.kind
        );
        let links = core::mem::take(&mut tasks[task].links);
        match links.prev {
            Some(prev) => tasks[prev].links.next = links.next,
            None => self.head = links.next,
        }
        match links.next {
            Some(next) => tasks[next].links.prev = links.prev,
            None => self.tail = links.prev,
        }
        self.len -= 1;
    }

    /// Removes and returns the head
    pub fn pop_head(&mut self, tasks: &mut TaskTable) -> Option<TaskHandle> {
        let head = self.head?;
        self.remove(tasks, head);
        Some(head)
    }

    /// The entry behind `task`
    pub fn next_of(&self, tasks: &TaskTable, task: TaskHandle) -> Option<TaskHandle> {
        debug_assert_eq!(tasks[task].links.queue, Some(self.kind));
        tasks[task].links.next
    }

    /// Iterates entries head to tail
    pub fn iter<'a>(&self, tasks: &'a TaskTable) -> QueueIter<'a> {
        QueueIter {
            tasks,
            cursor: self.head,
        }
    }

    /// Snapshot of the entries, head first
    pub fn handles(&self, tasks: &TaskTable) -> Vec<TaskHandle> {
        self.iter(tasks).collect()
    }
}

/// Head-to-tail iterator over a [`TaskQueue`]
pub struct QueueIter<'a> {
    tasks: &'a TaskTable,
    cursor: Option<TaskHandle>,
}

impl Iterator for QueueIter<'_> {
    type Item = TaskHandle;

    fn next(&mut self) -> Option<TaskHandle> {
        let current = self.cursor?;
        self.cursor = self.tasks.get(current).and_then(|tcr| tcr.links.next);
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskControlRecord;
    use core_types::{Priority, TaskId};

    fn table() -> TaskTable {
        TaskTable::with_idle_tasks(32, 0)
    }

    fn spawn(tasks: &mut TaskTable, priority: u8) -> TaskHandle {
        tasks
            .insert(TaskControlRecord::new(TaskId::new(), Priority(priority)))
            .unwrap()
    }

    fn priorities(queue: &TaskQueue, tasks: &TaskTable) -> Vec<u8> {
        queue.iter(tasks).map(|h| tasks[h].priority().value()).collect()
    }

    #[test]
    fn test_insert_into_empty_queue_becomes_head_and_tail() {
        let mut tasks = table();
        let mut queue = TaskQueue::new(QueueKind::Ready);
        let a = spawn(&mut tasks, 10);

        assert!(queue.insert_ordered(&mut tasks, a));
        assert_eq!(queue.head(), Some(a));
        assert_eq!(queue.tail(), Some(a));
        assert_eq!(queue.len(), 1);
        assert_eq!(tasks[a].queue(), Some(QueueKind::Ready));
    }

    #[test]
    fn test_descending_priority_order() {
        let mut tasks = table();
        let mut queue = TaskQueue::new(QueueKind::Pending);
        for priority in [5, 20, 1, 15, 10] {
            let handle = spawn(&mut tasks, priority);
            queue.insert_ordered(&mut tasks, handle);
        }
        assert_eq!(priorities(&queue, &tasks), vec![20, 15, 10, 5, 1]);
    }

    #[test]
    fn test_equal_priorities_keep_arrival_order() {
        let mut tasks = table();
        let mut queue = TaskQueue::new(QueueKind::Ready);
        let a = spawn(&mut tasks, 10);
        let b = spawn(&mut tasks, 10);
        let c = spawn(&mut tasks, 10);
        let high = spawn(&mut tasks, 30);

        assert!(queue.insert_ordered(&mut tasks, a));
        assert!(!queue.insert_ordered(&mut tasks, b));
        assert!(!queue.insert_ordered(&mut tasks, c));
        assert!(queue.insert_ordered(&mut tasks, high));
        assert_eq!(queue.handles(&tasks), vec![high, a, b, c]);
    }

    #[test]
    fn test_insert_returns_true_only_for_new_head() {
        let mut tasks = table();
        let mut queue = TaskQueue::new(QueueKind::Ready);
        let mid = spawn(&mut tasks, 10);
        let low = spawn(&mut tasks, 5);
        let top = spawn(&mut tasks, 11);

        assert!(queue.insert_ordered(&mut tasks, mid));
        assert!(!queue.insert_ordered(&mut tasks, low));
        assert_eq!(queue.tail(), Some(low));
        assert!(queue.insert_ordered(&mut tasks, top));
    }

    #[test]
    fn test_remove_head_middle_tail() {
        let mut tasks = table();
        let mut queue = TaskQueue::new(QueueKind::Run(CoreId(0)));
        let a = spawn(&mut tasks, 30);
        let b = spawn(&mut tasks, 20);
        let c = spawn(&mut tasks, 10);
        let d = spawn(&mut tasks, 5);
        for handle in [a, b, c, d] {
            queue.insert_ordered(&mut tasks, handle);
        }

        queue.remove(&mut tasks, b);
        assert_eq!(queue.handles(&tasks), vec![a, c, d]);
        assert_eq!(tasks[b].queue(), None);

        queue.remove(&mut tasks, a);
        assert_eq!(queue.head(), Some(c));

        queue.remove(&mut tasks, d);
        assert_eq!(queue.tail(), Some(c));
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.pop_head(&mut tasks), Some(c));
        assert!(queue.is_empty());
        assert_eq!(queue.head(), None);
        assert_eq!(queue.tail(), None);
        assert_eq!(queue.pop_head(&mut tasks), None);
    }

    #[test]
    fn test_removed_task_can_be_requeued_elsewhere() {
        let mut tasks = table();
        let mut ready = TaskQueue::new(QueueKind::Ready);
        let mut pending = TaskQueue::new(QueueKind::Pending);
        let a = spawn(&mut tasks, 10);

        ready.insert_ordered(&mut tasks, a);
        ready.remove(&mut tasks, a);
        assert!(pending.insert_ordered(&mut tasks, a));
        assert_eq!(tasks[a].queue(), Some(QueueKind::Pending));
        assert!(ready.is_empty());
    }

    #[test]
    fn test_next_of_walks_links() {
        let mut tasks = table();
        let mut queue = TaskQueue::new(QueueKind::Ready);
        let a = spawn(&mut tasks, 9);
        let b = spawn(&mut tasks, 3);
        queue.insert_ordered(&mut tasks, a);
        queue.insert_ordered(&mut tasks, b);
        assert_eq!(queue.next_of(&tasks, a), Some(b));
        assert_eq!(queue.next_of(&tasks, b), None);
    }
}
