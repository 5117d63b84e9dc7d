use crate::mem::pagedir::PageDirectory;
use crate::mem::supplemental::SupplementalPageTable;
use crate::mem::VirtAddr;
use crate::sync::semaphore::{SemaphoreGuard, SemaphoreLock};
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};
use vmcore_shared::mem::OFFSET;

pub type Pid = u16;

/// The user half of one process's memory.
///
/// Frames point back here so eviction can reach the victim's page directory
/// and supplemental page table.
pub struct AddressSpace {
    pid: Pid,
    pagedir: Arc<dyn PageDirectory>,
    pages: Arc<SemaphoreLock<SupplementalPageTable>>,
    /// Stack pointer saved on entry to the kernel, for faults raised while
    /// the kernel touches user memory.
    user_esp: AtomicUsize,
}

impl AddressSpace {
    pub fn new(pid: Pid, pagedir: Arc<dyn PageDirectory>) -> Arc<Self> {
        Arc::new(Self {
            pid,
            pagedir,
            pages: Arc::new(SemaphoreLock::new(SupplementalPageTable::new())),
            user_esp: AtomicUsize::new(OFFSET),
        })
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn pagedir(&self) -> &dyn PageDirectory {
        &*self.pagedir
    }

    /// Lock the supplemental page table. Blocks while eviction on another
    /// thread holds it.
    pub fn pages(&self) -> SemaphoreGuard<'_, SupplementalPageTable> {
        self.pages.lock()
    }

    pub(crate) fn pages_lock(&self) -> &Arc<SemaphoreLock<SupplementalPageTable>> {
        &self.pages
    }

    pub fn user_esp(&self) -> VirtAddr {
        self.user_esp.load(Ordering::Relaxed)
    }

    /// Called on every transition from user to kernel mode.
    pub fn set_user_esp(&self, esp: VirtAddr) {
        self.user_esp.store(esp, Ordering::Relaxed);
    }
}

impl fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressSpace")
            .field("pid", &self.pid)
            .field("user_esp", &format_args!("{:#x}", self.user_esp()))
            .finish_non_exhaustive()
    }
}
