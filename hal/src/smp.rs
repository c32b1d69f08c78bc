//! Cross-core pause/resume abstraction

use core_types::CoreId;

/// Acknowledgement that a core has stopped at a safe point.
///
/// Only obtainable from [`CrossCorePauseResume::pause`] implementations and
/// consumed by [`CrossCorePauseResume::resume`], so every pause is matched by
/// exactly one resume.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a paused core must be resumed"]
pub struct PauseAck {
    core: CoreId,
}

impl PauseAck {
    /// Records that `core` acknowledged a pause request
    ///
    /// Intended for implementations of [`CrossCorePauseResume`].
    pub fn acknowledge(core: CoreId) -> Self {
        Self { core }
    }

    /// The paused core
    pub fn core(&self) -> CoreId {
        self.core
    }
}

/// Halts another core so its run queue can be mutated safely
///
/// `pause` must not return before the target core has acknowledged the
/// halt. Bounding that wait is the caller's concern (a watchdog elsewhere).
pub trait CrossCorePauseResume {
    /// Requests that `core` halt at its next safe point and waits for it
    fn pause(&mut self, core: CoreId) -> PauseAck;

    /// Lets a previously paused core continue
    fn resume(&mut self, ack: PauseAck);
}
