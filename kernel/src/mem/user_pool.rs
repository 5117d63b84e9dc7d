use super::{Page, PhysFrame, PhysicalMemory};
use crate::sync::mutex::Mutex;
use alloc::{boxed::Box, vec, vec::Vec};
use log::error;
use vmcore_shared::mem::PAGE_FRAME_SIZE;

/// Keeps track of which frames in the pool are free.
///
/// Fast operations are:
///   - Find a free frame, and mark it as allocated
///   - Mark a (previously-allocated) frame as free.
///
/// Uses roughly 1.1 bits per frame.
#[derive(Debug, Clone)]
struct FreeFrames {
    /// A set bit means the frame is free.
    bitmap: Vec<u64>,
    /// Indices of groups in `bitmap` with at least one free frame.
    queue: Vec<u32>,
    free: usize,
}

impl FreeFrames {
    fn new_all_free(count: usize) -> Self {
        let group_count = count.div_ceil(64);
        let mut bitmap = vec![u64::MAX; group_count];
        if count % 64 != 0 {
            if let Some(last) = bitmap.last_mut() {
                *last = (1 << (count % 64)) - 1;
            }
        }
        #[allow(clippy::cast_possible_truncation)]
        let queue = (0..group_count as u32).rev().collect();
        Self {
            bitmap,
            queue,
            free: count,
        }
    }

    /// This takes *O(1)* time.
    fn allocate(&mut self) -> Option<usize> {
        let group_index = *self.queue.last()?;
        let group = &mut self.bitmap[group_index as usize];
        debug_assert_ne!(*group, 0, "FreeFrames consistency error");
        let index_in_group = group.trailing_zeros();
        // clear bit
        *group &= !(1 << index_in_group);
        if *group == 0 {
            self.queue.pop();
        }
        self.free -= 1;
        Some(group_index as usize * 64 + index_in_group as usize)
    }

    /// Returns `false`, leaving the set untouched, if the frame was already
    /// free. This takes *O(1)* time.
    fn free(&mut self, index: usize) -> bool {
        let group_index = index / 64;
        let index_in_group = index % 64;
        let group = &mut self.bitmap[group_index];
        if *group & (1 << index_in_group) != 0 {
            return false;
        }
        let add = *group == 0;
        // set bit
        *group |= 1 << index_in_group;
        if add {
            #[allow(clippy::cast_possible_truncation)]
            self.queue.push(group_index as u32);
        }
        self.free += 1;
        true
    }
}

/// A fixed pool of user page frames.
///
/// Frame numbers start at `first`, so they read like physical addresses.
pub struct UserPool {
    first: PhysFrame,
    pages: Box<[Mutex<Page>]>,
    free: Mutex<FreeFrames>,
}

impl UserPool {
    pub fn new(first: PhysFrame, count: usize) -> Self {
        let pages: Vec<Mutex<Page>> = (0..count)
            .map(|_| Mutex::new([0; PAGE_FRAME_SIZE]))
            .collect();
        Self {
            first,
            pages: pages.into_boxed_slice(),
            free: Mutex::new(FreeFrames::new_all_free(count)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.pages.len()
    }

    pub fn free_pages(&self) -> usize {
        self.free.lock().free
    }

    fn index_of(&self, frame: PhysFrame) -> Option<usize> {
        let index = frame.number().checked_sub(self.first.number())?;
        (index < self.pages.len()).then_some(index)
    }
}

impl PhysicalMemory for UserPool {
    fn alloc_page(&self) -> Option<PhysFrame> {
        let index = self.free.lock().allocate()?;
        Some(PhysFrame::from_number(self.first.number() + index))
    }

    fn free_page(&self, frame: PhysFrame) -> bool {
        let Some(index) = self.index_of(frame) else {
            return false;
        };
        self.free.lock().free(index)
    }

    fn with_page(&self, frame: PhysFrame, f: &mut dyn FnMut(&mut Page)) {
        let Some(index) = self.index_of(frame) else {
            error!("frame {:#x} does not belong to the user pool", frame.number());
            panic!("access to foreign frame {:#x}", frame.number());
        };
        f(&mut self.pages[index].lock());
    }
}
