//! Test utilities for driving the schedulers on the host
//!
//! Stands in for the hardware seams: [`SimCores`] plays every core of a
//! machine from one thread and [`RecordingSwitch`] records context switches
//! instead of performing them.

use alloc::vec::Vec;
use core_types::{CoreId, CpuSet, Priority, TaskId};
use hal::{ContextSwitch, CpuHal, CrossCorePauseResume, PauseAck};

use crate::task::TaskControlRecord;

/// Pause protocol traffic observed by [`SimCores`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreControlEvent {
    Paused(CoreId),
    Resumed(CoreId),
}

/// Simulated multi-core machine
///
/// The "calling core" is whatever the test last selected with
/// [`SimCores::set_current`]. Pausing the calling core, or a core that is
/// already paused, is a protocol error and panics.
#[derive(Debug)]
pub struct SimCores {
    core_count: usize,
    current: CoreId,
    paused: CpuSet,
    log: Vec<CoreControlEvent>,
}

impl SimCores {
    pub fn new(core_count: usize) -> Self {
        Self {
            core_count,
            current: CoreId(0),
            paused: CpuSet::empty(),
            log: Vec::new(),
        }
    }

    /// Selects the core subsequent scheduler calls run on
    pub fn set_current(&mut self, core: CoreId) {
        assert!(core.0 < self.core_count, "{} is not online", core);
        self.current = core;
    }

    /// Cores currently halted
    pub fn paused(&self) -> CpuSet {
        self.paused
    }

    pub fn pause_log(&self) -> &[CoreControlEvent] {
        &self.log
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }
}

impl CpuHal for SimCores {
    fn this_cpu(&self) -> CoreId {
        self.current
    }
}

impl CrossCorePauseResume for SimCores {
    fn pause(&mut self, core: CoreId) -> PauseAck {
        assert_ne!(core, self.current, "a core cannot pause itself");
        assert!(!self.paused.contains(core), "{} is already paused", core);
        self.paused.insert(core).ok();
        self.log.push(CoreControlEvent::Paused(core));
        PauseAck::acknowledge(core)
    }

    fn resume(&mut self, ack: PauseAck) {
        let core = ack.core();
        assert!(self.paused.contains(core), "{} was not paused", core);
        self.paused.remove(core);
        self.log.push(CoreControlEvent::Resumed(core));
    }
}

/// A context switch the dispatcher asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextSwitchRecord {
    pub core: CoreId,
    pub from: TaskId,
    pub to: TaskId,
}

/// Records switches in order instead of saving and restoring registers
#[derive(Debug, Default)]
pub struct RecordingSwitch {
    switches: Vec<ContextSwitchRecord>,
}

impl RecordingSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn switches(&self) -> &[ContextSwitchRecord] {
        &self.switches
    }

    pub fn last(&self) -> Option<&ContextSwitchRecord> {
        self.switches.last()
    }
}

impl ContextSwitch for RecordingSwitch {
    fn switch_context(&mut self, core: CoreId, from: TaskId, to: TaskId) {
        self.switches.push(ContextSwitchRecord { core, from, to });
    }
}

/// Fresh task record at `priority` with a random id, runnable on any core
pub fn task(priority: u8) -> TaskControlRecord {
    TaskControlRecord::new(TaskId::new(), Priority(priority))
}
