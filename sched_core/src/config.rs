//! Scheduler configuration

use crate::error::SchedError;
use core_types::MAX_CORES;

/// Scheduler configuration
///
/// Fixed at kernel init; nothing here changes while the scheduler runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Number of online cores (1 for the uniprocessor build)
    pub core_count: usize,
    /// Number of task control record slots, idle tasks included
    pub task_capacity: usize,
    /// Number of audit records kept; 0 disables the audit trail
    pub audit_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            core_count: 1,
            task_capacity: 64,
            audit_capacity: 256,
        }
    }
}

impl SchedulerConfig {
    /// Default configuration with `core_count` online cores
    pub fn smp(core_count: usize) -> Self {
        Self {
            core_count,
            ..Self::default()
        }
    }

    pub(crate) fn validate(&self) -> Result<(), SchedError> {
        if self.core_count == 0 || self.core_count > MAX_CORES {
            return Err(SchedError::InvalidCoreCount(self.core_count));
        }
        if self.task_capacity < self.core_count {
            return Err(SchedError::InvalidCapacity {
                capacity: self.task_capacity,
                required: self.core_count,
            });
        }
        Ok(())
    }
}
