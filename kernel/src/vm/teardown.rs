use super::address_space::AddressSpace;
use super::Vm;
use crate::error::VmError;
use crate::mem::frame_table::write_to_file;
use crate::mem::supplemental::{PageEntry, SupplementalPageTable};
use crate::mem::VirtAddr;
use alloc::vec::Vec;
use log::{debug, warn};

impl Vm {
    /// Write a resident, dirty, file-backed page back to its file and mark it
    /// clean. Anything else is left alone.
    pub(super) fn flush_if_dirty(
        &self,
        space: &AddressSpace,
        upage: VirtAddr,
        entry: &PageEntry,
    ) -> Result<(), VmError> {
        let PageEntry::File {
            file,
            offset,
            read_bytes,
        } = entry
        else {
            return Ok(());
        };
        if !space.pagedir().is_dirty(upage) {
            return Ok(());
        }
        let Some((_, kpage)) = self.frames.find(space.pid(), upage) else {
            return Ok(());
        };

        debug!("vm: flushing {}:{upage:#x}", space.pid());
        write_to_file(&*self.memory, kpage, &**file, *offset, *read_bytes)?;
        space.pagedir().set_dirty(upage, false);
        Ok(())
    }

    /// Flush every dirty mapped-file page of `space` back to its file, then
    /// remove and release every entry of its supplemental page table.
    ///
    /// `pages` must be `space`'s table, locked by the caller.
    pub fn destroy_all_for(&self, space: &AddressSpace, pages: &mut SupplementalPageTable) {
        for (upage, entry) in pages.iter() {
            if let Err(err) = self.flush_if_dirty(space, upage, entry) {
                warn!("vm: lost write-back of {}:{upage:#x}: {err}", space.pid());
            }
        }
        pages.clear(&self.swap);
    }

    /// Tear down the user half of `space`: flush mapped files, free every
    /// frame and swap slot the process holds and remove its mappings.
    ///
    /// Takes the process's supplemental page table semaphore for the whole
    /// teardown, so an eviction in progress against one of its frames
    /// finishes first and no new one can start.
    pub fn exit_process(&self, space: &AddressSpace) {
        let mut pages = space.pages();
        self.destroy_all_for(space, &mut pages);

        let upages: Vec<VirtAddr> = self.frames.release_all_for(space.pid());
        for upage in &upages {
            space.pagedir().clear(*upage);
        }
        debug!(
            "vm: pid {} exited, released {} frames",
            space.pid(),
            upages.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use crate::block::block_core::{Block, BlockType};
    use crate::drivers::memory_device::MemoryDevice;
    use crate::error::VmError;
    use crate::fs::memfile::MemoryFile;
    use crate::fs::{FileError, VmFile};
    use crate::mem::pagedir::{FlatPageDirectory, PageDirectory};
    use crate::mem::user_pool::UserPool;
    use crate::mem::{Page, PhysFrame};
    use crate::vm::address_space::AddressSpace;
    use crate::vm::{FaultOutcome, Vm, VmConfig};
    use alloc::boxed::Box;
    use alloc::sync::Arc;
    use alloc::vec;
    use vmcore_shared::mem::{OFFSET, PAGE_FRAME_SIZE};
    use vmcore_shared::paging::PageFaultErrorCode;

    fn vm(frames: usize) -> Vm {
        Vm::new(
            VmConfig::default(),
            Arc::new(UserPool::new(PhysFrame::from_number(0x400), frames)),
            Block::new(BlockType::Swap, "swap", 64, Box::new(MemoryDevice::new(64))),
        )
    }

    fn user_write() -> PageFaultErrorCode {
        PageFaultErrorCode::DEFAULT.with_write(true).with_user(true)
    }

    #[test]
    fn test_exit_releases_frames_slots_and_mappings() {
        let vm = vm(1);
        let pagedir = Arc::new(FlatPageDirectory::new());
        let space = AddressSpace::new(7, pagedir.clone());
        vm.setup_stack(&space).unwrap();

        let top = OFFSET - PAGE_FRAME_SIZE;
        let below = top - PAGE_FRAME_SIZE;
        assert_eq!(
            vm.handle_fault(&space, top, top, user_write()),
            FaultOutcome::Resolved
        );
        // Growing the stack evicts the first page to swap.
        assert_eq!(
            vm.handle_fault(&space, below, below, user_write()),
            FaultOutcome::Resolved
        );
        assert_eq!(vm.swap().slots_in_use(), 1);

        vm.exit_process(&space);
        let stats = vm.stats();
        assert_eq!(stats.frames_in_use, 0);
        assert_eq!(stats.swap_slots_in_use, 0);
        assert_eq!(pagedir.mapped(), 0);
        assert!(space.pages().is_empty());
    }

    #[test]
    fn test_destroy_flushes_only_dirty_file_pages() {
        let vm = vm(4);
        let pagedir = Arc::new(FlatPageDirectory::new());
        let space = AddressSpace::new(3, pagedir.clone());
        let file = Arc::new(MemoryFile::new(vec![b'a'; 2 * PAGE_FRAME_SIZE]));
        let start = 0x1000_0000;
        vm.map_file(&space, file.clone(), start, file.len()).unwrap();

        for upage in [start, start + PAGE_FRAME_SIZE] {
            assert_eq!(
                vm.handle_fault(&space, upage, upage, user_write()),
                FaultOutcome::Resolved
            );
        }
        // Only the second page is written.
        let (_, kpage) = vm.frames().find(3, start + PAGE_FRAME_SIZE).unwrap();
        vm.memory.zero(kpage);
        pagedir.set_dirty(start + PAGE_FRAME_SIZE, true);
        let (_, first) = vm.frames().find(3, start).unwrap();
        vm.memory.with_page(first, &mut |page: &mut Page| {
            page[0] = b'z';
        });

        vm.destroy_all_for(&space, &mut space.pages());
        let contents = file.contents();
        assert_eq!(contents[0], b'a');
        assert!(contents[PAGE_FRAME_SIZE..].iter().all(|&b| b == 0));
        assert!(!pagedir.is_dirty(start + PAGE_FRAME_SIZE));
    }

    /// Takes only half of every write.
    struct HalfWrites(MemoryFile);

    impl VmFile for HalfWrites {
        fn read_at(&self, buf: &mut [u8], offset: usize) -> Result<usize, FileError> {
            self.0.read_at(buf, offset)
        }

        fn write_at(&self, buf: &[u8], offset: usize) -> Result<usize, FileError> {
            self.0.write_at(&buf[..buf.len() / 2], offset)
        }

        fn len(&self) -> usize {
            self.0.len()
        }
    }

    #[test]
    fn test_flush_reports_short_write() {
        let vm = vm(2);
        let pagedir = Arc::new(FlatPageDirectory::new());
        let space = AddressSpace::new(5, pagedir.clone());
        let file = Arc::new(HalfWrites(MemoryFile::new(vec![0; PAGE_FRAME_SIZE])));
        let start = 0x1000_0000;
        vm.map_file(&space, file, start, PAGE_FRAME_SIZE).unwrap();
        assert_eq!(
            vm.handle_fault(&space, start, start, user_write()),
            FaultOutcome::Resolved
        );
        pagedir.set_dirty(start, true);

        let pages = space.pages();
        let entry = pages.lookup(start).unwrap();
        assert_eq!(
            vm.flush_if_dirty(&space, start, entry),
            Err(VmError::ShortWrite {
                expected: PAGE_FRAME_SIZE,
                actual: PAGE_FRAME_SIZE / 2,
            })
        );
        // Still dirty, so a later flush tries again.
        assert!(pagedir.is_dirty(start));
    }
}
