use super::{PhysFrame, VirtAddr};
use crate::error::VmError;
use crate::sync::mutex::Mutex;
use alloc::collections::BTreeMap;
use vmcore_shared::mem::pg_round_down;
use vmcore_shared::paging::PageTableEntry;

/// A process's hardware page directory, as seen by the virtual memory core.
///
/// Every address passed in is a page-aligned user virtual address. The MMU
/// sets the accessed and dirty bits behind the kernel's back, so callers must
/// treat whatever they read as a snapshot.
pub trait PageDirectory: Send + Sync {
    /// Map `upage` to `frame`. Fails with [`VmError::AlreadyMapped`] if
    /// `upage` already has a mapping.
    fn install(&self, upage: VirtAddr, frame: PhysFrame, writable: bool) -> Result<(), VmError>;

    /// Remove the mapping for `upage`, returning the entry that was there.
    /// Later accesses fault.
    fn clear(&self, upage: VirtAddr) -> Option<PageTableEntry>;

    /// The present entry for `upage`, if any.
    fn entry(&self, upage: VirtAddr) -> Option<PageTableEntry>;

    /// Does nothing if `upage` is not mapped.
    fn set_accessed(&self, upage: VirtAddr, accessed: bool);

    /// Does nothing if `upage` is not mapped.
    fn set_dirty(&self, upage: VirtAddr, dirty: bool);

    fn is_accessed(&self, upage: VirtAddr) -> bool {
        self.entry(upage).is_some_and(|pte| pte.accessed())
    }

    fn is_dirty(&self, upage: VirtAddr) -> bool {
        self.entry(upage).is_some_and(|pte| pte.dirty())
    }

    fn is_mapped(&self, upage: VirtAddr) -> bool {
        self.entry(upage).is_some()
    }
}

/// A single-level page directory kept in kernel memory.
///
/// Stands in for the MMU on hosted builds: [`Self::touch`] performs an access
/// the way the hardware would, setting the accessed bit and, on writes, the
/// dirty bit.
#[derive(Default)]
pub struct FlatPageDirectory {
    entries: Mutex<BTreeMap<VirtAddr, PageTableEntry>>,
}

impl FlatPageDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a user access to `addr`. Returns `false` where the hardware
    /// would raise a page fault: the page is not mapped, or the access is a
    /// write to a read-only page.
    pub fn touch(&self, addr: VirtAddr, write: bool) -> bool {
        let mut entries = self.entries.lock();
        let Some(pte) = entries.get_mut(&pg_round_down(addr)) else {
            return false;
        };
        if write && !pte.read_write() {
            return false;
        }
        *pte = pte.with_accessed(true).with_dirty(pte.dirty() || write);
        true
    }

    /// Number of present mappings.
    pub fn mapped(&self) -> usize {
        self.entries.lock().len()
    }

    fn update(&self, upage: VirtAddr, f: impl FnOnce(PageTableEntry) -> PageTableEntry) {
        if let Some(pte) = self.entries.lock().get_mut(&upage) {
            *pte = f(*pte);
        }
    }
}

impl PageDirectory for FlatPageDirectory {
    fn install(&self, upage: VirtAddr, frame: PhysFrame, writable: bool) -> Result<(), VmError> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&upage) {
            return Err(VmError::AlreadyMapped { addr: upage });
        }
        entries.insert(
            upage,
            PageTableEntry::user_mapping(frame.number(), writable),
        );
        Ok(())
    }

    fn clear(&self, upage: VirtAddr) -> Option<PageTableEntry> {
        self.entries.lock().remove(&upage)
    }

    fn entry(&self, upage: VirtAddr) -> Option<PageTableEntry> {
        self.entries.lock().get(&upage).copied()
    }

    fn set_accessed(&self, upage: VirtAddr, accessed: bool) {
        self.update(upage, |pte| pte.with_accessed(accessed));
    }

    fn set_dirty(&self, upage: VirtAddr, dirty: bool) {
        self.update(upage, |pte| pte.with_dirty(dirty));
    }
}
