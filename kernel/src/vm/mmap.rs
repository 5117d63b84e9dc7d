use super::address_space::AddressSpace;
use super::Vm;
use crate::error::VmError;
use crate::fs::VmFile;
use crate::mem::supplemental::{MapId, PageEntry};
use crate::mem::VirtAddr;
use alloc::sync::Arc;
use log::{debug, warn};
use vmcore_shared::mem::{is_page_aligned, PAGE_FRAME_SIZE};

impl Vm {
    /// Map the first `length` bytes of `file` at `addr`. Nothing is read
    /// until the pages are touched; the tail of the last page reads as
    /// zeros and is never written back.
    ///
    /// The mapping must start at a non-null page boundary, cover at least
    /// one byte and no more than the file holds, end below the stack region
    /// and not overlap any page the process already has.
    pub fn map_file(
        &self,
        space: &AddressSpace,
        file: Arc<dyn VmFile>,
        addr: VirtAddr,
        length: usize,
    ) -> Result<MapId, VmError> {
        if addr == 0 || length == 0 || length > file.len() {
            return Err(VmError::BadMapping);
        }
        if !is_page_aligned(addr) {
            return Err(VmError::Misaligned { addr });
        }
        let pages = length.div_ceil(PAGE_FRAME_SIZE);
        let end = pages
            .checked_mul(PAGE_FRAME_SIZE)
            .and_then(|size| addr.checked_add(size))
            .ok_or(VmError::BadMapping)?;
        if end > self.config.stack_limit() {
            return Err(VmError::BadMapping);
        }

        let mut table = space.pages();
        if let Some(upage) = (addr..end)
            .step_by(PAGE_FRAME_SIZE)
            .find(|&upage| table.contains(upage) || space.pagedir().is_mapped(upage))
        {
            return Err(VmError::AlreadyMapped { addr: upage });
        }

        for (i, upage) in (addr..end).step_by(PAGE_FRAME_SIZE).enumerate() {
            let offset = i * PAGE_FRAME_SIZE;
            table.insert(
                upage,
                PageEntry::File {
                    file: file.clone(),
                    offset,
                    read_bytes: PAGE_FRAME_SIZE.min(length - offset),
                },
            )?;
        }
        let id = table.add_region(addr, pages, file);
        debug!(
            "mmap: pid {} mapped {length} bytes at {addr:#x} as {}",
            space.pid(),
            id.as_u32()
        );
        Ok(id)
    }

    /// Undo the mapping that starts at `addr`: write dirty resident pages
    /// back to the file, unmap them and forget the pages.
    ///
    /// The mapping is gone afterwards even if a write-back failed; the first
    /// such failure is returned.
    pub fn unmap_file(&self, space: &AddressSpace, addr: VirtAddr) -> Result<(), VmError> {
        let mut table = space.pages();
        let region = table.take_region(addr).ok_or(VmError::NotMapped { addr })?;
        let mut lost = None;

        for upage in region.upages() {
            if let Some(entry) = table.lookup(upage) {
                if let Err(err) = self.flush_if_dirty(space, upage, entry) {
                    warn!("mmap: lost write-back of {upage:#x}: {err}");
                    lost.get_or_insert(err);
                }
            }
            if let Some((id, _)) = self.frames.find(space.pid(), upage) {
                space.pagedir().clear(upage);
                self.frames.release_frame(id);
            }
            table.remove_and_release(upage, &self.swap);
        }
        debug!(
            "mmap: pid {} unmapped {} at {addr:#x}",
            space.pid(),
            region.id().as_u32()
        );
        lost.map_or(Ok(()), Err)
    }
}
