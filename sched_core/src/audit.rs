//! Scheduler Audit Log
//!
//! Records scheduling decisions for test verification and debugging.
//! The ring is preallocated, so recording from interrupt context never
//! allocates; once full, the oldest record is dropped.

use crate::task::TaskState;
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core_types::{CoreId, TaskId};
use serde::{Deserialize, Serialize};

/// Scheduling event for the audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedEvent {
    /// Task became the running task of a core
    Running { core: CoreId, task: TaskId },
    /// Running task was displaced by a higher-priority arrival
    Preempted { core: CoreId, task: TaskId },
    /// Task joined the ready queue
    Ready { task: TaskId },
    /// Task was queued behind the running task of its bound core
    Assigned { core: CoreId, task: TaskId },
    /// Task was parked in the pending queue by a preemption lock
    Deferred { task: TaskId },
    /// Displaced task left the head of a run queue
    Demoted {
        core: CoreId,
        task: TaskId,
        to: TaskState,
    },
    /// Task left the scheduler's queues (blocked)
    Removed { task: TaskId },
    /// Another core was halted for a run queue mutation
    CorePaused { core: CoreId },
    /// A halted core was released
    CoreResumed { core: CoreId },
    /// Pending tasks re-offered after a lock release
    PendingMerged { count: usize },
}

/// Bounded audit log
#[derive(Debug, Clone)]
pub struct SchedAuditLog {
    events: VecDeque<SchedEvent>,
    capacity: usize,
    dropped: u64,
}

impl SchedAuditLog {
    /// Creates a log holding at most `capacity` events
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    pub fn record(&mut self, event: SchedEvent) {
        if self.capacity == 0 {
            return;
        }
        if self.events.len() == self.capacity {
            self.events.pop_front();
            self.dropped += 1;
        }
        self.events.push_back(event);
    }

    /// Recorded events, oldest first
    pub fn events(&self) -> impl Iterator<Item = &SchedEvent> + '_ {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of events lost to the ring wrapping
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.dropped = 0;
    }

    /// Returns events matching a predicate
    pub fn find_events<F>(&self, predicate: F) -> Vec<&SchedEvent>
    where
        F: Fn(&SchedEvent) -> bool,
    {
        self.events.iter().filter(|e| predicate(e)).collect()
    }

    /// Checks if any event matches a predicate
    pub fn has_event<F>(&self, predicate: F) -> bool
    where
        F: Fn(&SchedEvent) -> bool,
    {
        self.events.iter().any(predicate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_query() {
        let mut log = SchedAuditLog::new(8);
        let task = TaskId::new();
        log.record(SchedEvent::Ready { task });
        log.record(SchedEvent::Running {
            core: CoreId(0),
            task,
        });

        assert_eq!(log.len(), 2);
        assert!(log.has_event(|e| matches!(e, SchedEvent::Running { .. })));
        assert_eq!(
            log.find_events(|e| matches!(e, SchedEvent::Ready { .. }))
                .len(),
            1
        );
    }

    #[test]
    fn test_ring_drops_oldest() {
        let mut log = SchedAuditLog::new(2);
        for count in 0..5 {
            log.record(SchedEvent::PendingMerged { count });
        }
        let kept: Vec<&SchedEvent> = log.events().collect();
        assert_eq!(
            kept,
            vec![
                &SchedEvent::PendingMerged { count: 3 },
                &SchedEvent::PendingMerged { count: 4 }
            ]
        );
        assert_eq!(log.dropped(), 3);
    }

    #[test]
    fn test_zero_capacity_disables_recording() {
        let mut log = SchedAuditLog::new(0);
        log.record(SchedEvent::CorePaused { core: CoreId(1) });
        assert!(log.is_empty());
        assert_eq!(log.dropped(), 0);
    }

    #[test]
    fn test_events_serialize() {
        let event = SchedEvent::Demoted {
            core: CoreId(1),
            task: TaskId::new(),
            to: TaskState::Ready,
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: SchedEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }
}
