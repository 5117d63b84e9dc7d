//! Virtual memory for a small x86 teaching kernel.
//!
//! User pages are loaded lazily from executables, memory-mapped files or
//! nothing at all, evicted with the clock algorithm when physical memory
//! runs out, and kept in swap when they have nowhere else to go. The kernel
//! plugs in its physical page pool ([`mem::PhysicalMemory`]), page
//! directories ([`mem::pagedir::PageDirectory`]), files ([`fs::VmFile`]) and
//! a swap disk ([`block::block_core::BlockOp`]), and forwards page faults to
//! [`vm::Vm::handle_fault`].

#![cfg_attr(target_os = "none", no_std)]

extern crate alloc;

pub mod block;
pub mod drivers;
pub mod error;
pub mod fs;
pub mod mem;
pub mod sync;
pub mod vm;

pub use error::VmError;
pub use vm::{FaultOutcome, Vm, VmConfig, VmStats};
