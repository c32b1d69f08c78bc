//! # Core Types
//!
//! This crate defines the leaf types shared by the scheduler core and the
//! hardware abstraction layer.
//!
//! ## Philosophy
//!
//! - **Explicit over implicit**: cores, priorities and tasks are distinct
//!   types and cannot be confused with bare integers.
//! - **No allocation**: every type here is `Copy` and fits in a register or two,
//!   so it can be handled from interrupt context.
//!
//! ## Key Types
//!
//! - [`TaskId`]: Unique identifier for tasks
//! - [`CoreId`]: Index of a processor core
//! - [`CpuSet`]: Set of cores (affinity masks, lock holder sets)
//! - [`Priority`]: Fixed scheduling priority, higher is more urgent

#![cfg_attr(not(test), no_std)]

pub mod cpu;
pub mod ids;
pub mod priority;

pub use cpu::{CoreId, CpuSet, CpuSetError, CpuSetIter, MAX_CORES};
pub use ids::TaskId;
pub use priority::Priority;
