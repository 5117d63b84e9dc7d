use super::address_space::AddressSpace;
use super::Vm;
use crate::error::VmError;
use crate::fs::VmFile;
use crate::mem::supplemental::PageEntry;
use crate::mem::VirtAddr;
use alloc::sync::Arc;
use log::debug;
use vmcore_shared::mem::{is_page_aligned, OFFSET, PAGE_FRAME_SIZE};

impl Vm {
    /// Describe a loadable segment: starting at `upage`, `read_bytes` bytes
    /// come from `file` at `offset` and the following `zero_bytes` are zero.
    /// Pages are read on first touch.
    ///
    /// `upage` and `offset` must be page aligned and the segment must cover a
    /// whole number of pages, none of which may already be described.
    #[allow(clippy::too_many_arguments)]
    pub fn map_segment(
        &self,
        space: &AddressSpace,
        file: Arc<dyn VmFile>,
        offset: usize,
        upage: VirtAddr,
        read_bytes: usize,
        zero_bytes: usize,
        writable: bool,
    ) -> Result<(), VmError> {
        if !is_page_aligned(upage) {
            return Err(VmError::Misaligned { addr: upage });
        }
        if !is_page_aligned(offset) {
            return Err(VmError::Misaligned { addr: offset });
        }
        let size = read_bytes + zero_bytes;
        if !is_page_aligned(size) || upage.checked_add(size).map_or(true, |end| end > OFFSET) {
            return Err(VmError::BadMapping);
        }

        let mut table = space.pages();
        if let Some(taken) = (upage..upage + size)
            .step_by(PAGE_FRAME_SIZE)
            .find(|&page| table.contains(page))
        {
            return Err(VmError::AlreadyMapped { addr: taken });
        }

        let mut remaining = read_bytes;
        for (i, page) in (upage..upage + size).step_by(PAGE_FRAME_SIZE).enumerate() {
            let page_read_bytes = remaining.min(PAGE_FRAME_SIZE);
            remaining -= page_read_bytes;
            let entry = if page_read_bytes == 0 && writable {
                PageEntry::Zero
            } else {
                PageEntry::Exec {
                    file: file.clone(),
                    offset: offset + i * PAGE_FRAME_SIZE,
                    read_bytes: page_read_bytes,
                    writable,
                }
            };
            table.insert(page, entry)?;
        }
        debug!(
            "loader: pid {} segment {upage:#x}..{:#x} ({read_bytes} from file)",
            space.pid(),
            upage + size
        );
        Ok(())
    }

    /// Describe the initial stack page, just below the top of user space,
    /// and point the saved stack pointer at its top.
    pub fn setup_stack(&self, space: &AddressSpace) -> Result<(), VmError> {
        space
            .pages()
            .insert(OFFSET - PAGE_FRAME_SIZE, PageEntry::Stack)?;
        space.set_user_esp(OFFSET);
        Ok(())
    }
}
