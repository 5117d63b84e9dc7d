//! Swap space: page-sized slots carved out of a raw block device.
//!
//! Free space is kept as a list of runs of sectors sorted by start sector.
//! Allocation takes the first run big enough for one page; freeing puts the
//! slot back in order and merges it with its neighbours, so no two runs in
//! the list are ever adjacent.

use super::Page;
use crate::block::block_core::{Block, BlockSector, BLOCK_SECTOR_SIZE};
use crate::error::VmError;
use crate::sync::mutex::Mutex;
use alloc::vec::Vec;
use log::{debug, error, info};
use vmcore_shared::sizes::SECTORS_PER_PAGE;

/// One page worth of swap, handed out by [`SwapSpace::allocate_slot`].
///
/// Not `Clone`: a slot is consumed exactly once, by either
/// [`SwapSpace::read_slot`] or [`SwapSpace::free_slot`].
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub struct SwapSlot {
    sector: BlockSector,
}

impl SwapSlot {
    /// First sector of the slot on the swap device.
    pub fn sector(&self) -> BlockSector {
        self.sector
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FreeRun {
    start: BlockSector,
    len: BlockSector,
}

impl FreeRun {
    fn end(&self) -> BlockSector {
        self.start + self.len
    }
}

pub struct SwapSpace {
    free: Mutex<Vec<FreeRun>>,
    block: Mutex<Block>,
    /// Sectors usable for slots: the device size rounded down to whole pages.
    sectors: BlockSector,
}

impl SwapSpace {
    pub fn new(block: Block) -> Self {
        let sectors = block.get_size() - block.get_size() % SECTORS_PER_PAGE;
        info!(
            "swap: using {} ({} slots)",
            block.get_name(),
            sectors / SECTORS_PER_PAGE
        );
        let free = if sectors == 0 {
            Vec::new()
        } else {
            Vec::from([FreeRun {
                start: 0,
                len: sectors,
            }])
        };
        Self {
            free: Mutex::new(free),
            block: Mutex::new(block),
            sectors,
        }
    }

    /// Take the lowest-addressed free slot.
    pub fn allocate_slot(&self) -> Result<SwapSlot, VmError> {
        let mut free = self.free.lock();
        let Some(index) = free.iter().position(|run| run.len >= SECTORS_PER_PAGE) else {
            debug!("swap: no free slot");
            return Err(VmError::OutOfSwap);
        };
        let run = &mut free[index];
        let slot = SwapSlot { sector: run.start };
        run.start += SECTORS_PER_PAGE;
        run.len -= SECTORS_PER_PAGE;
        if run.len == 0 {
            free.remove(index);
        }
        Ok(slot)
    }

    /// Return `slot` to the free list.
    ///
    /// # Panics
    ///
    /// Panics if any part of the slot is already free or lies past the end of
    /// the device.
    pub fn free_slot(&self, slot: SwapSlot) {
        let mut free = self.free.lock();
        let freed = FreeRun {
            start: slot.sector,
            len: SECTORS_PER_PAGE,
        };
        let index = free.partition_point(|run| run.start < freed.start);
        let overlaps_prev = index > 0 && free[index - 1].end() > freed.start;
        let overlaps_next = free.get(index).is_some_and(|next| freed.end() > next.start);
        if overlaps_prev || overlaps_next || freed.end() > self.sectors {
            error!("swap: bad free of slot at sector {}", freed.start);
            panic!("swap slot {} is already free or out of range", freed.start);
        }

        free.insert(index, freed);
        if index + 1 < free.len() && free[index].end() == free[index + 1].start {
            free[index].len += free[index + 1].len;
            free.remove(index + 1);
        }
        if index > 0 && free[index - 1].end() == free[index].start {
            free[index - 1].len += free[index].len;
            free.remove(index);
        }
    }

    /// Copy `page` into `slot`.
    pub fn write_slot(&self, slot: &SwapSlot, page: &Page) -> Result<(), VmError> {
        debug!("swap: writing slot {}", slot.sector);
        let mut block = self.block.lock();
        for (sector, chunk) in (slot.sector..).zip(page.chunks_exact(BLOCK_SECTOR_SIZE)) {
            block.write(sector, chunk)?;
        }
        Ok(())
    }

    /// Copy `slot` into `page` and free the slot. The slot is freed even if
    /// the read fails, since its contents are of no further use either way.
    pub fn read_slot(&self, slot: SwapSlot, page: &mut Page) -> Result<(), VmError> {
        debug!("swap: reading slot {}", slot.sector);
        let result = {
            let mut block = self.block.lock();
            (slot.sector..)
                .zip(page.chunks_exact_mut(BLOCK_SECTOR_SIZE))
                .try_for_each(|(sector, chunk)| block.read(sector, chunk))
        };
        self.free_slot(slot);
        Ok(result?)
    }

    /// Total number of slots on the device.
    pub fn capacity(&self) -> usize {
        (self.sectors / SECTORS_PER_PAGE) as usize
    }

    pub fn free_sectors(&self) -> usize {
        self.free.lock().iter().map(|run| run.len as usize).sum()
    }

    pub fn slots_in_use(&self) -> usize {
        self.capacity() - self.free_sectors() / SECTORS_PER_PAGE as usize
    }

    #[cfg(test)]
    fn runs(&self) -> Vec<FreeRun> {
        self.free.lock().clone()
    }
}
