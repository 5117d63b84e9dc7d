//! The supplemental page table: per process, how each lazily loaded or
//! evicted page gets its contents back.

use super::swap::{SwapSlot, SwapSpace};
use super::VirtAddr;
use crate::error::VmError;
use crate::fs::VmFile;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::fmt;
use log::trace;
use vmcore_shared::mem::{is_page_aligned, is_user_vaddr, pg_round_down, PAGE_FRAME_SIZE};

/// What a page held before it was evicted. Also tags frames so eviction knows
/// where a victim's contents can go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Exec,
    File,
    Swap,
    Zero,
    Stack,
}

/// How to materialise one virtual page.
pub enum PageEntry {
    /// A page of an executable's segment: `read_bytes` from `file` at
    /// `offset`, then zeros.
    Exec {
        file: Arc<dyn VmFile>,
        offset: usize,
        read_bytes: usize,
        writable: bool,
    },
    /// A page of a memory-mapped file. Always writable; dirty pages go back
    /// to the file rather than to swap.
    File {
        file: Arc<dyn VmFile>,
        offset: usize,
        read_bytes: usize,
    },
    /// An evicted page whose contents sit in swap.
    Swapped {
        slot: SwapSlot,
        dirty: bool,
        kind_before: PageKind,
        writable: bool,
    },
    Zero,
    /// A stack page that has not been touched yet.
    Stack,
}

impl PageEntry {
    pub fn kind(&self) -> PageKind {
        match self {
            PageEntry::Exec { .. } => PageKind::Exec,
            PageEntry::File { .. } => PageKind::File,
            PageEntry::Swapped { .. } => PageKind::Swap,
            PageEntry::Zero => PageKind::Zero,
            PageEntry::Stack => PageKind::Stack,
        }
    }

    pub fn writable(&self) -> bool {
        match self {
            PageEntry::Exec { writable, .. } | PageEntry::Swapped { writable, .. } => *writable,
            PageEntry::File { .. } | PageEntry::Zero | PageEntry::Stack => true,
        }
    }

    /// One-shot entries are consumed by the fault that brings the page in.
    /// The rest stay behind so a clean page can simply be dropped on eviction
    /// and read again later.
    pub fn is_one_shot(&self) -> bool {
        matches!(self, PageEntry::Swapped { .. } | PageEntry::Stack)
    }

    /// Copy a persistent entry. `None` for [`PageEntry::Swapped`], whose slot
    /// has a single owner.
    fn duplicate(&self) -> Option<PageEntry> {
        Some(match self {
            PageEntry::Exec {
                file,
                offset,
                read_bytes,
                writable,
            } => PageEntry::Exec {
                file: file.clone(),
                offset: *offset,
                read_bytes: *read_bytes,
                writable: *writable,
            },
            PageEntry::File {
                file,
                offset,
                read_bytes,
            } => PageEntry::File {
                file: file.clone(),
                offset: *offset,
                read_bytes: *read_bytes,
            },
            PageEntry::Swapped { .. } => return None,
            PageEntry::Zero => PageEntry::Zero,
            PageEntry::Stack => PageEntry::Stack,
        })
    }

    /// Give back whatever the entry owns. Files are shared with the
    /// process's descriptor table and just lose a reference.
    pub fn release(self, swap: &SwapSpace) {
        if let PageEntry::Swapped { slot, .. } = self {
            swap.free_slot(slot);
        }
    }
}

impl fmt::Debug for PageEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageEntry::Exec {
                offset,
                read_bytes,
                writable,
                ..
            } => f
                .debug_struct("Exec")
                .field("offset", offset)
                .field("read_bytes", read_bytes)
                .field("writable", writable)
                .finish_non_exhaustive(),
            PageEntry::File {
                offset, read_bytes, ..
            } => f
                .debug_struct("File")
                .field("offset", offset)
                .field("read_bytes", read_bytes)
                .finish_non_exhaustive(),
            PageEntry::Swapped {
                slot,
                dirty,
                kind_before,
                writable,
            } => f
                .debug_struct("Swapped")
                .field("sector", &slot.sector())
                .field("dirty", dirty)
                .field("kind_before", kind_before)
                .field("writable", writable)
                .finish(),
            PageEntry::Zero => write!(f, "Zero"),
            PageEntry::Stack => write!(f, "Stack"),
        }
    }
}

/// Identifies one `mmap` of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MapId(u32);

impl MapId {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// A file mapped over `pages` consecutive pages starting at `start`.
pub struct MmapRegion {
    id: MapId,
    start: VirtAddr,
    pages: usize,
    file: Arc<dyn VmFile>,
}

impl MmapRegion {
    pub fn id(&self) -> MapId {
        self.id
    }

    pub fn start(&self) -> VirtAddr {
        self.start
    }

    pub fn pages(&self) -> usize {
        self.pages
    }

    /// The page addresses covered by the region.
    pub fn upages(&self) -> impl Iterator<Item = VirtAddr> {
        let start = self.start;
        (0..self.pages).map(move |i| start + i * PAGE_FRAME_SIZE)
    }

    pub fn file(&self) -> &Arc<dyn VmFile> {
        &self.file
    }
}

/// One process's supplemental page table, together with its file mappings.
///
/// Keys are page-aligned user addresses and unique. Guarded by the owning
/// process's binary semaphore: both the process's own fault handler and
/// eviction on behalf of other processes modify it.
#[derive(Default)]
pub struct SupplementalPageTable {
    entries: BTreeMap<VirtAddr, PageEntry>,
    regions: BTreeMap<VirtAddr, MmapRegion>,
    next_map_id: u32,
}

impl SupplementalPageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Describe the page at `upage`. Fails if `upage` is not a page-aligned
    /// user address or already has an entry; the entry is dropped in that
    /// case.
    pub fn insert(&mut self, upage: VirtAddr, entry: PageEntry) -> Result<(), VmError> {
        if !is_page_aligned(upage) {
            return Err(VmError::Misaligned { addr: upage });
        }
        if !is_user_vaddr(upage) {
            return Err(VmError::InvalidAccess { addr: upage });
        }
        if self.entries.contains_key(&upage) {
            return Err(VmError::AlreadyMapped { addr: upage });
        }
        trace!("spt: {upage:#x} -> {entry:?}");
        self.entries.insert(upage, entry);
        Ok(())
    }

    /// The entry for the page containing `addr`.
    pub fn lookup(&self, addr: VirtAddr) -> Option<&PageEntry> {
        self.entries.get(&pg_round_down(addr))
    }

    pub fn contains(&self, addr: VirtAddr) -> bool {
        self.lookup(addr).is_some()
    }

    /// Put `entry` at `upage`, returning the entry it displaced. Used by
    /// eviction, which may overwrite a persistent entry with a swapped one.
    pub fn replace(&mut self, upage: VirtAddr, entry: PageEntry) -> Option<PageEntry> {
        trace!("spt: {upage:#x} => {entry:?}");
        self.entries.insert(upage, entry)
    }

    /// Remove the entry for the page containing `addr` and hand it to the
    /// caller, who becomes responsible for releasing it.
    pub fn take(&mut self, addr: VirtAddr) -> Option<PageEntry> {
        self.entries.remove(&pg_round_down(addr))
    }

    /// Remove the entry for the page containing `addr` and release what it
    /// owns. Returns whether there was an entry.
    pub fn remove_and_release(&mut self, addr: VirtAddr, swap: &SwapSpace) -> bool {
        match self.take(addr) {
            Some(entry) => {
                entry.release(swap);
                true
            }
            None => false,
        }
    }

    /// Fetch the entry a fault at `addr` should materialise. One-shot
    /// entries leave the table; persistent ones stay and a copy is returned.
    pub fn checkout(&mut self, addr: VirtAddr) -> Option<PageEntry> {
        let upage = pg_round_down(addr);
        let entry = self.entries.get(&upage)?;
        if entry.is_one_shot() {
            self.entries.remove(&upage)
        } else {
            entry.duplicate()
        }
    }

    /// Whether any entry falls in the `pages` pages starting at `start`.
    pub fn overlaps(&self, start: VirtAddr, pages: usize) -> bool {
        let end = start.saturating_add(pages.saturating_mul(PAGE_FRAME_SIZE));
        self.entries.range(start..end).next().is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (VirtAddr, &PageEntry)> {
        self.entries.iter().map(|(upage, entry)| (*upage, entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove and release every entry, and forget every mapping.
    pub fn clear(&mut self, swap: &SwapSpace) {
        for (_, entry) in core::mem::take(&mut self.entries) {
            entry.release(swap);
        }
        self.regions.clear();
    }

    /// Record a file mapping. The caller inserts the page entries.
    pub fn add_region(&mut self, start: VirtAddr, pages: usize, file: Arc<dyn VmFile>) -> MapId {
        let id = MapId(self.next_map_id);
        self.next_map_id += 1;
        self.regions.insert(
            start,
            MmapRegion {
                id,
                start,
                pages,
                file,
            },
        );
        id
    }

    pub fn region(&self, start: VirtAddr) -> Option<&MmapRegion> {
        self.regions.get(&start)
    }

    /// Forget the mapping that starts at `start`. Its page entries stay.
    pub fn take_region(&mut self, start: VirtAddr) -> Option<MmapRegion> {
        self.regions.remove(&start)
    }

    pub fn regions(&self) -> impl Iterator<Item = &MmapRegion> {
        self.regions.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::block_core::{Block, BlockType};
    use crate::drivers::memory_device::MemoryDevice;
    use crate::fs::memfile::MemoryFile;
    use alloc::boxed::Box;
    use alloc::vec;

    const UPAGE: VirtAddr = 0x0804_8000;

    fn swap() -> SwapSpace {
        SwapSpace::new(Block::new(
            BlockType::Swap,
            "swap",
            32,
            Box::new(MemoryDevice::new(32)),
        ))
    }

    fn exec_entry() -> PageEntry {
        PageEntry::Exec {
            file: Arc::new(MemoryFile::new(vec![1; 100])),
            offset: 0,
            read_bytes: 100,
            writable: false,
        }
    }

    #[test]
    fn test_duplicate_insert_fails() {
        let mut spt = SupplementalPageTable::new();
        spt.insert(UPAGE, PageEntry::Zero).unwrap();
        assert_eq!(
            spt.insert(UPAGE, exec_entry()),
            Err(VmError::AlreadyMapped { addr: UPAGE })
        );
        assert_eq!(spt.lookup(UPAGE).map(PageEntry::kind), Some(PageKind::Zero));
    }

    #[test]
    fn test_insert_checks_address() {
        let mut spt = SupplementalPageTable::new();
        assert_eq!(
            spt.insert(UPAGE + 1, PageEntry::Zero),
            Err(VmError::Misaligned { addr: UPAGE + 1 })
        );
        assert!(spt.insert(0x8000_0000, PageEntry::Zero).is_err());
        assert!(spt.is_empty());
    }

    #[test]
    fn test_lookup_rounds_down() {
        let mut spt = SupplementalPageTable::new();
        spt.insert(UPAGE, exec_entry()).unwrap();
        let entry = spt.lookup(UPAGE + 0xfff).unwrap();
        assert_eq!(entry.kind(), PageKind::Exec);
        assert!(!entry.writable());
        assert!(spt.lookup(UPAGE + PAGE_FRAME_SIZE).is_none());
    }

    #[test]
    fn test_remove_and_release_frees_slot() {
        let swap = swap();
        let mut spt = SupplementalPageTable::new();
        let slot = swap.allocate_slot().unwrap();
        assert!(spt
            .replace(
                UPAGE,
                PageEntry::Swapped {
                    slot,
                    dirty: true,
                    kind_before: PageKind::Zero,
                    writable: true,
                },
            )
            .is_none());
        assert_eq!(swap.slots_in_use(), 1);

        assert!(spt.remove_and_release(UPAGE + 8, &swap));
        assert!(spt.lookup(UPAGE).is_none());
        assert_eq!(swap.slots_in_use(), 0);
        assert!(!spt.remove_and_release(UPAGE, &swap));
    }

    #[test]
    fn test_checkout_consumes_only_one_shot_entries() {
        let mut spt = SupplementalPageTable::new();
        spt.insert(UPAGE, exec_entry()).unwrap();
        spt.insert(UPAGE + PAGE_FRAME_SIZE, PageEntry::Stack).unwrap();

        assert!(matches!(spt.checkout(UPAGE), Some(PageEntry::Exec { .. })));
        assert!(spt.contains(UPAGE));
        assert!(matches!(
            spt.checkout(UPAGE + PAGE_FRAME_SIZE),
            Some(PageEntry::Stack)
        ));
        assert!(!spt.contains(UPAGE + PAGE_FRAME_SIZE));
        assert!(spt.checkout(UPAGE + PAGE_FRAME_SIZE).is_none());
    }

    #[test]
    fn test_clear_releases_everything() {
        let swap = swap();
        let mut spt = SupplementalPageTable::new();
        for i in 0..3 {
            let slot = swap.allocate_slot().unwrap();
            spt.replace(
                UPAGE + i * PAGE_FRAME_SIZE,
                PageEntry::Swapped {
                    slot,
                    dirty: false,
                    kind_before: PageKind::Stack,
                    writable: true,
                },
            );
        }
        spt.insert(0x1000_0000, PageEntry::Zero).unwrap();
        let file: Arc<dyn VmFile> = Arc::new(MemoryFile::new(vec![0; 10]));
        spt.add_region(0x2000_0000, 1, file);

        spt.clear(&swap);
        assert!(spt.is_empty());
        assert_eq!(spt.regions().count(), 0);
        assert_eq!(swap.slots_in_use(), 0);
    }

    #[test]
    fn test_overlap_and_regions() {
        let mut spt = SupplementalPageTable::new();
        spt.insert(UPAGE + 2 * PAGE_FRAME_SIZE, PageEntry::Zero).unwrap();
        assert!(!spt.overlaps(UPAGE, 2));
        assert!(spt.overlaps(UPAGE, 3));

        let file: Arc<dyn VmFile> = Arc::new(MemoryFile::new(vec![0; 10]));
        let first = spt.add_region(UPAGE, 2, file.clone());
        let second = spt.add_region(0x1000_0000, 1, file);
        assert_ne!(first, second);
        let region = spt.take_region(UPAGE).unwrap();
        assert_eq!(region.id(), first);
        assert_eq!(
            region.upages().collect::<alloc::vec::Vec<_>>(),
            [UPAGE, UPAGE + PAGE_FRAME_SIZE]
        );
        assert!(spt.take_region(UPAGE).is_none());
    }
}
