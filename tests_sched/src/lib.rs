//! Scheduler Test Utilities
//!
//! This crate provides shared helpers for the scheduler scenario tests.
//!
//! ## Test Philosophy
//!
//! - **Invariants after every call**: queues are checked with `verify()`
//!   between operations, not only at the end of a scenario
//! - **Deterministic sequences**: randomized runs are driven by a seeded
//!   generator so every failure is reproducible
//! - **No hardware**: cores and context switches are simulated

use core_types::{CoreId, CpuSet};
use sched_core::test_utils::{task, SimCores};
use sched_core::{SchedulerConfig, SmpScheduler, TaskHandle, UpScheduler};

/// Bootstrap helper for uniprocessor tests
pub fn up_bootstrap() -> UpScheduler {
    UpScheduler::new()
}

/// Bootstrap helper for multiprocessor tests, calling from core 0
pub fn smp_bootstrap(core_count: usize) -> SmpScheduler<SimCores> {
    match SmpScheduler::new(SchedulerConfig::smp(core_count), SimCores::new(core_count)) {
        Ok(sched) => sched,
        Err(err) => panic!("bootstrap failed: {}", err),
    }
}

/// Spawns a task and makes it runnable, returning its handle
pub fn up_ready(sched: &mut UpScheduler, priority: u8) -> TaskHandle {
    let handle = sched.spawn(task(priority)).expect("spawn failed");
    sched.make_runnable(handle);
    handle
}

/// Makes a fresh task hard-bound to `core` runnable
///
/// Used to give a core a running task of a known priority.
pub fn smp_occupy(sched: &mut SmpScheduler<SimCores>, core: CoreId, priority: u8) -> TaskHandle {
    let handle = sched
        .spawn(task(priority).locked_to(core))
        .expect("spawn failed");
    sched.make_runnable_smp(handle);
    handle
}

/// Runs `f` as if called from `core`, then returns to the previous core
pub fn on_core<R>(
    sched: &mut SmpScheduler<SimCores>,
    core: CoreId,
    f: impl FnOnce(&mut SmpScheduler<SimCores>) -> R,
) -> R {
    let previous = hal::CpuHal::this_cpu(sched.platform());
    sched.platform_mut().set_current(core);
    let result = f(sched);
    sched.platform_mut().set_current(previous);
    result
}

/// Deterministic xorshift64 generator for randomized call sequences
#[derive(Debug, Clone)]
pub struct SeededRng {
    state: u64,
}

impl SeededRng {
    pub fn new(seed: u64) -> Self {
        // Zero is a fixed point of xorshift.
        Self {
            state: seed.max(1),
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Uniform-ish value in `0..bound`
    pub fn below(&mut self, bound: usize) -> usize {
        assert!(bound > 0);
        (self.next_u64() % bound as u64) as usize
    }

    pub fn chance(&mut self, percent: usize) -> bool {
        self.below(100) < percent
    }

    /// Random user priority in `1..=max`
    pub fn priority(&mut self, max: u8) -> u8 {
        1 + self.below(max as usize) as u8
    }

    /// Random non-empty subset of the first `core_count` cores
    pub fn affinity(&mut self, core_count: usize) -> CpuSet {
        let all = CpuSet::first(core_count).bits();
        let mut bits = self.next_u64() as u32 & all;
        if bits == 0 {
            bits = 1 << self.below(core_count);
        }
        CpuSet::from_bits(bits)
    }

    pub fn pick<T: Copy>(&mut self, items: &[T]) -> Option<T> {
        if items.is_empty() {
            None
        } else {
            Some(items[self.below(items.len())])
        }
    }
}
