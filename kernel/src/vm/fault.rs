use super::address_space::AddressSpace;
use super::Vm;
use crate::error::VmError;
use crate::fs::VmFile;
use crate::mem::supplemental::PageEntry;
use crate::mem::{Page, PhysFrame, VirtAddr};
use alloc::sync::Arc;
use core::sync::atomic::Ordering;
use log::{trace, warn};
use vmcore_shared::mem::{is_user_vaddr, pg_round_down, OFFSET};
use vmcore_shared::paging::PageFaultErrorCode;

/// How a page fault ended. There is no third way: either the page is mapped
/// and the faulting instruction can be restarted, or the process is gone.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOutcome {
    Resolved,
    /// The process was torn down because of this error.
    Terminated(VmError),
}

impl Vm {
    /// Handle a page fault at `fault_addr` in `space`.
    ///
    /// The trap dispatcher reads the faulting address (`cr2`) with
    /// interrupts still off and may enable them before calling this. `esp` is
    /// the stack pointer from the trap frame; for faults taken in kernel mode
    /// it is the kernel's own, so the one saved at system call entry is used
    /// instead.
    pub fn handle_fault(
        &self,
        space: &Arc<AddressSpace>,
        fault_addr: VirtAddr,
        esp: VirtAddr,
        code: PageFaultErrorCode,
    ) -> FaultOutcome {
        self.page_faults.fetch_add(1, Ordering::Relaxed);
        trace!(
            "fault: pid {} at {fault_addr:#x} ({}{}{})",
            space.pid(),
            if code.present() { "rights" } else { "not present" },
            if code.write() { ", write" } else { "" },
            if code.user() { ", user" } else { ", kernel" },
        );

        match self.resolve(space, fault_addr, esp, code) {
            Ok(()) => FaultOutcome::Resolved,
            Err(err) => {
                warn!(
                    "fault: pid {} at {fault_addr:#x}: {err}, terminating",
                    space.pid()
                );
                self.exit_process(space);
                FaultOutcome::Terminated(err)
            }
        }
    }

    fn resolve(
        &self,
        space: &Arc<AddressSpace>,
        fault_addr: VirtAddr,
        esp: VirtAddr,
        code: PageFaultErrorCode,
    ) -> Result<(), VmError> {
        if code.present() {
            return Err(VmError::ReadOnly { addr: fault_addr });
        }
        if !is_user_vaddr(fault_addr) {
            return Err(VmError::InvalidAccess { addr: fault_addr });
        }
        let esp = if code.user() { esp } else { space.user_esp() };
        let upage = pg_round_down(fault_addr);

        // The semaphore is dropped before a frame is requested, so eviction
        // can still pick this process's frames.
        let entry = match space.pages().checkout(upage) {
            Some(entry) => entry,
            None if self.is_stack_growth(fault_addr, esp) => PageEntry::Stack,
            None => return Err(VmError::InvalidAccess { addr: fault_addr }),
        };
        self.materialize(space, upage, entry)
    }

    /// Whether a fault at `addr` with the stack pointer at `esp` is the stack
    /// growing down.
    pub fn is_stack_growth(&self, addr: VirtAddr, esp: VirtAddr) -> bool {
        addr >= esp.saturating_sub(self.config.stack_slack)
            && addr >= self.config.stack_limit()
            && addr < OFFSET
    }

    /// Bring `entry` in at `upage` and map it. On failure everything
    /// allocated along the way is released again.
    fn materialize(
        &self,
        space: &Arc<AddressSpace>,
        upage: VirtAddr,
        entry: PageEntry,
    ) -> Result<(), VmError> {
        let kind = match &entry {
            PageEntry::Swapped { kind_before, .. } => *kind_before,
            entry => entry.kind(),
        };
        let writable = entry.writable();

        let (id, kpage) = match self.frames.acquire_frame(space, upage, kind, writable) {
            Ok(frame) => frame,
            Err(err) => {
                entry.release(&self.swap);
                return Err(err);
            }
        };

        let installed = self.fill(kpage, entry).and_then(|dirty| {
            space.pagedir().install(upage, kpage, writable)?;
            Ok(dirty)
        });
        match installed {
            Ok(dirty) => {
                if dirty {
                    space.pagedir().set_dirty(upage, true);
                }
                self.frames.set_materialized(id);
                trace!("fault: {upage:#x} -> {:#x} ({kind:?})", kpage.number());
                Ok(())
            }
            Err(err) => {
                self.frames.release_frame(id);
                Err(err)
            }
        }
    }

    /// Fill `kpage` with the contents `entry` describes. Returns whether the
    /// page must be marked dirty once mapped.
    fn fill(&self, kpage: PhysFrame, entry: PageEntry) -> Result<bool, VmError> {
        match entry {
            PageEntry::Exec {
                file,
                offset,
                read_bytes,
                ..
            }
            | PageEntry::File {
                file,
                offset,
                read_bytes,
            } => {
                self.read_page(kpage, &*file, offset, read_bytes)?;
                Ok(false)
            }
            PageEntry::Swapped { slot, dirty, .. } => {
                let mut slot = Some(slot);
                let mut result = Ok(());
                self.memory.with_page(kpage, &mut |page: &mut Page| {
                    if let Some(slot) = slot.take() {
                        result = self.swap.read_slot(slot, page);
                    }
                });
                result?;
                Ok(dirty)
            }
            PageEntry::Zero | PageEntry::Stack => {
                self.memory.zero(kpage);
                Ok(false)
            }
        }
    }

    /// Read `read_bytes` of `file` at `offset` into the start of `kpage` and
    /// zero the rest.
    fn read_page(
        &self,
        kpage: PhysFrame,
        file: &dyn VmFile,
        offset: usize,
        read_bytes: usize,
    ) -> Result<(), VmError> {
        let mut result = Ok(());
        self.memory.with_page(kpage, &mut |page: &mut Page| {
            let (head, tail) = page.split_at_mut(read_bytes);
            tail.fill(0);
            result = match file.read_at(head, offset) {
                Ok(actual) if actual == read_bytes => Ok(()),
                Ok(actual) => Err(VmError::ShortRead {
                    expected: read_bytes,
                    actual,
                }),
                Err(err) => Err(err.into()),
            };
        });
        result
    }
}
