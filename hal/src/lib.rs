//! # Hardware Abstraction Layer (HAL)
//!
//! This crate defines the hardware seams the scheduler core depends on but
//! does not implement.
//!
//! ## Philosophy
//!
//! **Architecture must be fully abstracted and swappable.**
//!
//! No architecture-specific assumptions should leak into the scheduler.
//! Architecture crates implement these traits; the choice is made at build
//! time, never through runtime dispatch tables.
//!
//! ## Design Principles
//!
//! 1. **Trait-based**: every hardware operation goes through a trait
//! 2. **Synchronous**: each call returns once the hardware has complied
//! 3. **Testable**: a single simulated core can implement all of them

#![no_std]

pub mod context;
pub mod cpu;
pub mod smp;

pub use context::ContextSwitch;
pub use cpu::CpuHal;
pub use smp::{CrossCorePauseResume, PauseAck};
