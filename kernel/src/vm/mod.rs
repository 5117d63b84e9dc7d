//! The virtual memory core: frames, swap and lazily loaded pages, tied
//! together by the page fault handler.
//!
//! Lock order, outermost first:
//!
//! 1. a process's supplemental page table semaphore,
//! 2. the frame table lock (with interrupts held while scanning),
//! 3. the swap free list and swap device locks, and the page directory locks.
//!
//! Eviction is the one path that needs another process's semaphore while
//! holding the frame table lock. It only ever tries the semaphore and passes
//! over the frame if the owner is busy, rescanning until the owner lets go,
//! and it drops the frame table lock before any I/O.

pub mod address_space;
mod fault;
mod loader;
mod mmap;
mod teardown;

pub use self::fault::FaultOutcome;

use crate::block::block_core::Block;
use crate::mem::frame_table::FrameTable;
use crate::mem::swap::SwapSpace;
use crate::mem::PhysicalMemory;
use alloc::boxed::Box;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};
use log::info;
use once_cell::race::OnceBox;
use vmcore_shared::mem::{OFFSET, PAGE_FRAME_SIZE};

/// Runtime tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// Largest the user stack may grow, in pages.
    pub max_stack_pages: usize,
    /// How far below the stack pointer an access still counts as stack
    /// growth. `PUSHA` writes 32 bytes below `esp` before moving it.
    pub stack_slack: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_stack_pages: 2000,
            stack_slack: 32,
        }
    }
}

impl VmConfig {
    /// Lowest address the stack may grow down to.
    pub fn stack_limit(&self) -> usize {
        OFFSET.saturating_sub(self.max_stack_pages.saturating_mul(PAGE_FRAME_SIZE))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VmStats {
    pub page_faults: usize,
    pub evictions: usize,
    pub frames_in_use: usize,
    pub swap_slots_in_use: usize,
    pub free_swap_sectors: usize,
}

pub struct Vm {
    config: VmConfig,
    memory: Arc<dyn PhysicalMemory>,
    swap: Arc<SwapSpace>,
    frames: FrameTable,
    page_faults: AtomicUsize,
}

impl Vm {
    pub fn new(config: VmConfig, memory: Arc<dyn PhysicalMemory>, swap_device: Block) -> Self {
        let swap = Arc::new(SwapSpace::new(swap_device));
        info!(
            "vm: {} swap slots, stack limit {:#x}",
            swap.capacity(),
            config.stack_limit()
        );
        Self {
            config,
            frames: FrameTable::new(memory.clone(), swap.clone()),
            memory,
            swap,
            page_faults: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn frames(&self) -> &FrameTable {
        &self.frames
    }

    pub fn swap(&self) -> &SwapSpace {
        &self.swap
    }

    pub fn stats(&self) -> VmStats {
        VmStats {
            page_faults: self.page_faults.load(Ordering::Relaxed),
            evictions: self.frames.evictions(),
            frames_in_use: self.frames.frames_in_use(),
            swap_slots_in_use: self.swap.slots_in_use(),
            free_swap_sectors: self.swap.free_sectors(),
        }
    }

    /// Log the counters. Called at shutdown.
    pub fn print_stats(&self) {
        let stats = self.stats();
        info!(
            "vm: {} page faults, {} evictions",
            stats.page_faults, stats.evictions
        );
    }
}

static VM: OnceBox<Vm> = OnceBox::new();

/// Install the kernel's virtual memory core.
///
/// # Panics
///
/// Panics if called more than once.
pub fn init(vm: Vm) {
    if VM.set(Box::new(vm)).is_err() {
        panic!("VM initialized twice");
    }
}

/// # Panics
///
/// Panics if [`init`] has not been called.
pub fn vm() -> &'static Vm {
    match VM.get() {
        Some(vm) => vm,
        None => panic!("VM not initialized"),
    }
}

pub fn try_vm() -> Option<&'static Vm> {
    VM.get()
}
