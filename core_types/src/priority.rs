//! Fixed scheduling priorities

use core::fmt;
use serde::{Deserialize, Serialize};

/// Scheduling priority; higher values are more urgent.
///
/// [`Priority::IDLE`] belongs to the per-core idle tasks and must never be
/// given to any other task, so the idle task always sorts last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Priority(pub u8);

impl Priority {
    /// Priority of the idle task
    pub const IDLE: Priority = Priority(0);
    /// Lowest priority available to ordinary tasks
    pub const MIN: Priority = Priority(1);
    /// Highest priority
    pub const MAX: Priority = Priority(u8::MAX);

    /// Returns the raw priority value
    pub const fn value(self) -> u8 {
        self.0
    }

    /// Returns true for the idle priority
    pub const fn is_idle(self) -> bool {
        self.0 == Self::IDLE.0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pri={}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::IDLE < Priority::MIN);
        assert!(Priority(10) < Priority(20));
        assert!(Priority::MAX > Priority(200));
    }

    #[test]
    fn test_idle_detection() {
        assert!(Priority::IDLE.is_idle());
        assert!(!Priority::MIN.is_idle());
    }
}
