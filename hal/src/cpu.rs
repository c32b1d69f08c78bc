//! CPU abstraction

use core_types::CoreId;

/// CPU-specific queries
pub trait CpuHal {
    /// Returns the index of the core executing the caller
    fn this_cpu(&self) -> CoreId;
}
