//! The frame table: every user frame in use, who owns it, and the clock hand
//! that picks eviction victims.
//!
//! Frames live in an arena of slots. A [`FrameId`] names a slot together with
//! the slot's generation, which is bumped whenever the slot's frame is freed
//! or handed to a new owner, so stale ids are recognised instead of hitting
//! whichever frame reused the slot. The hand is a slot index that always
//! rests on a live frame while the table has any.
//!
//! Pages move between the pool and the table only under the table lock, so
//! every page missing from the pool is accounted for by a slot.

use super::supplemental::{PageEntry, PageKind, SupplementalPageTable};
use super::swap::SwapSpace;
use super::{Page, PhysFrame, PhysicalMemory, VirtAddr};
use crate::error::VmError;
use crate::fs::VmFile;
use crate::sync::intr::hold_interrupts;
use crate::sync::mutex::Mutex;
use crate::sync::relax;
use crate::sync::semaphore::{ArcSemaphoreGuard, SemaphoreLock};
use crate::vm::address_space::{AddressSpace, Pid};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};
use log::{debug, error, trace, warn};

/// Handle to a frame in the [`FrameTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId {
    index: u32,
    generation: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    /// Handed to a fault that has not mapped it yet.
    Filling,
    /// Mapped, and a clock candidate.
    Resident,
    /// Chosen as a victim; its contents are on their way out.
    Evicting,
}

struct Frame {
    owner: Arc<AddressSpace>,
    kpage: PhysFrame,
    upage: VirtAddr,
    kind: PageKind,
    writable: bool,
    state: FrameState,
}

struct Slot {
    generation: u32,
    frame: Option<Frame>,
}

#[derive(Default)]
struct Frames {
    slots: Vec<Slot>,
    /// Indices of empty slots.
    vacant: Vec<u32>,
    hand: usize,
    live: usize,
}

impl Frames {
    fn get_mut(&mut self, id: FrameId) -> Option<&mut Frame> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.frame.as_mut()
    }

    fn insert(&mut self, frame: Frame) -> FrameId {
        self.live += 1;
        if let Some(index) = self.vacant.pop() {
            let slot = &mut self.slots[index as usize];
            slot.frame = Some(frame);
            return FrameId {
                index,
                generation: slot.generation,
            };
        }
        #[allow(clippy::cast_possible_truncation)]
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            frame: Some(frame),
        });
        FrameId {
            index,
            generation: 0,
        }
    }

    /// Empty the slot at `index`, retiring its generation.
    fn remove(&mut self, index: usize) -> Option<Frame> {
        let slot = &mut self.slots[index];
        let frame = slot.frame.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        #[allow(clippy::cast_possible_truncation)]
        self.vacant.push(index as u32);
        self.live -= 1;
        if self.hand == index {
            self.advance_hand();
        }
        Some(frame)
    }

    /// Move the hand forward to the next occupied slot.
    fn advance_hand(&mut self) {
        let len = self.slots.len();
        if len == 0 {
            self.hand = 0;
            return;
        }
        for _ in 0..len {
            self.hand = (self.hand + 1) % len;
            if self.slots[self.hand].frame.is_some() {
                return;
            }
        }
    }
}

/// A frame chosen for eviction. Its mapping is already gone and its owner's
/// supplemental page table is held until the frame changes hands.
struct Victim {
    index: usize,
    kpage: PhysFrame,
    upage: VirtAddr,
    kind: PageKind,
    writable: bool,
    dirty: bool,
    owner: Arc<AddressSpace>,
    pages: ArcSemaphoreGuard<SupplementalPageTable>,
}

/// What one run of the clock found.
enum Scan {
    Victim(Victim),
    /// Every candidate is momentarily held by another fault, eviction or
    /// page table owner. Scanning again later will find one.
    Retry,
    /// Nothing in the table can be evicted for this requester, now or later.
    Exhausted,
}

/// Write the first `len` bytes of `kpage` to `file` at `offset`.
pub(crate) fn write_to_file(
    memory: &dyn PhysicalMemory,
    kpage: PhysFrame,
    file: &dyn VmFile,
    offset: usize,
    len: usize,
) -> Result<(), VmError> {
    let mut result = Ok(0);
    memory.with_page(kpage, &mut |page: &mut Page| {
        result = file.write_at(&page[..len], offset);
    });
    match result? {
        actual if actual == len => Ok(()),
        actual => Err(VmError::ShortWrite {
            expected: len,
            actual,
        }),
    }
}

pub struct FrameTable {
    frames: Mutex<Frames>,
    memory: Arc<dyn PhysicalMemory>,
    swap: Arc<SwapSpace>,
    evictions: AtomicUsize,
}

impl FrameTable {
    pub fn new(memory: Arc<dyn PhysicalMemory>, swap: Arc<SwapSpace>) -> Self {
        Self {
            frames: Mutex::new(Frames::default()),
            memory,
            swap,
            evictions: AtomicUsize::new(0),
        }
    }

    /// Get a frame for `owner` to map at `upage`, evicting another frame if
    /// physical memory is exhausted.
    ///
    /// The frame comes back pinned and with unspecified contents. Once it
    /// is filled and mapped, the caller must unpin it with
    /// [`Self::set_materialized`]; until then the clock skips it.
    ///
    /// Waits while every evictable frame is busy. The caller must not hold
    /// `owner`'s page table, or its own frames could never be chosen.
    pub fn acquire_frame(
        &self,
        owner: &Arc<AddressSpace>,
        upage: VirtAddr,
        kind: PageKind,
        writable: bool,
    ) -> Result<(FrameId, PhysFrame), VmError> {
        let frame = |kpage| Frame {
            owner: owner.clone(),
            kpage,
            upage,
            kind,
            writable,
            state: FrameState::Filling,
        };

        let victim = loop {
            let scan = {
                // Interrupts stay off so the dirty bit we read is the one we
                // act on.
                let _intr = hold_interrupts();
                let mut frames = self.frames.lock();
                if let Some(kpage) = self.memory.alloc_page() {
                    let id = frames.insert(frame(kpage));
                    trace!("frame: {:#x} for {}:{upage:#x}", kpage.number(), owner.pid());
                    return Ok((id, kpage));
                }
                Self::select_victim(&mut frames, owner.pid())
            };
            match scan {
                Scan::Victim(victim) => break victim,
                Scan::Retry => relax(),
                Scan::Exhausted => {
                    warn!("frame: nothing to evict for {}:{upage:#x}", owner.pid());
                    return Err(VmError::OutOfFrames);
                }
            }
        };

        let index = victim.index;
        let kpage = victim.kpage;
        let pages = self.evict(victim)?;

        let mut frames = self.frames.lock();
        let slot = &mut frames.slots[index];
        slot.generation = slot.generation.wrapping_add(1);
        slot.frame = Some(frame(kpage));
        #[allow(clippy::cast_possible_truncation)]
        let id = FrameId {
            index: index as u32,
            generation: slot.generation,
        };
        drop(frames);
        drop(pages);

        self.evictions.fetch_add(1, Ordering::Relaxed);
        Ok((id, kpage))
    }

    /// Run the clock over the table on behalf of `requester`.
    ///
    /// A resident frame whose accessed bit is set gets the bit cleared and is
    /// passed over; the first resident frame found with the bit clear, whose
    /// owner's page table is free, is the victim. Two sweeps visit every live
    /// frame twice, which is enough to find one if any qualifies.
    fn select_victim(frames: &mut Frames, requester: Pid) -> Scan {
        if frames.live == 0 {
            return Scan::Exhausted;
        }
        if frames.slots[frames.hand].frame.is_none() {
            frames.advance_hand();
        }
        let mut retry = false;

        for _ in 0..2 * frames.live {
            let index = frames.hand;
            frames.advance_hand();
            let Some(frame) = frames.slots[index].frame.as_mut() else {
                continue;
            };
            match frame.state {
                FrameState::Resident => {}
                // The requester's own fault cannot finish while it waits here.
                FrameState::Filling if frame.owner.pid() == requester => continue,
                FrameState::Filling | FrameState::Evicting => {
                    retry = true;
                    continue;
                }
            }

            let pagedir = frame.owner.pagedir();
            if pagedir.is_accessed(frame.upage) {
                pagedir.set_accessed(frame.upage, false);
                continue;
            }
            let Some(pages) = SemaphoreLock::try_lock_arc(frame.owner.pages_lock()) else {
                trace!("frame: owner {} busy, skipping", frame.owner.pid());
                retry = true;
                continue;
            };

            let dirty = pagedir.clear(frame.upage).is_some_and(|pte| pte.dirty());
            frame.state = FrameState::Evicting;
            debug!(
                "frame: evicting {}:{:#x} ({:?}, dirty: {dirty})",
                frame.owner.pid(),
                frame.upage,
                frame.kind
            );
            return Scan::Victim(Victim {
                index,
                kpage: frame.kpage,
                upage: frame.upage,
                kind: frame.kind,
                writable: frame.writable,
                dirty,
                owner: frame.owner.clone(),
                pages,
            });
        }

        if retry {
            Scan::Retry
        } else {
            Scan::Exhausted
        }
    }

    /// Save the victim's contents wherever they need to go. On failure the
    /// victim is mapped back in as it was and returned to the clock.
    fn evict(
        &self,
        mut victim: Victim,
    ) -> Result<ArcSemaphoreGuard<SupplementalPageTable>, VmError> {
        match self.write_back(&mut victim) {
            Ok(()) => Ok(victim.pages),
            Err(err) => {
                warn!("frame: eviction of {:#x} failed: {err}", victim.upage);
                let pagedir = victim.owner.pagedir();
                pagedir.install(victim.upage, victim.kpage, victim.writable)?;
                pagedir.set_dirty(victim.upage, victim.dirty);
                let mut frames = self.frames.lock();
                if let Some(frame) = frames.slots[victim.index].frame.as_mut() {
                    frame.state = FrameState::Resident;
                }
                Err(err)
            }
        }
    }

    fn write_back(&self, victim: &mut Victim) -> Result<(), VmError> {
        let upage = victim.upage;

        if victim.kind == PageKind::File {
            if !victim.dirty {
                return Ok(());
            }
            let Some(PageEntry::File {
                file,
                offset,
                read_bytes,
            }) = victim.pages.lookup(upage)
            else {
                error!("frame: mapped page {upage:#x} has no file entry");
                panic!("file-backed frame without a file entry");
            };
            return write_to_file(&*self.memory, victim.kpage, &**file, *offset, *read_bytes);
        }

        if !victim.dirty && victim.kind != PageKind::Stack {
            return Ok(());
        }
        let slot = self.swap.allocate_slot()?;
        let mut result = Ok(());
        self.memory.with_page(victim.kpage, &mut |page: &mut Page| {
            result = self.swap.write_slot(&slot, page);
        });
        if let Err(err) = result {
            self.swap.free_slot(slot);
            return Err(err);
        }
        let swapped = PageEntry::Swapped {
            slot,
            dirty: victim.dirty,
            kind_before: victim.kind,
            writable: victim.writable,
        };
        if let Some(old) = victim.pages.replace(upage, swapped) {
            old.release(&self.swap);
        }
        Ok(())
    }

    /// Mark a frame as filled and mapped, making it eligible for eviction.
    /// Returns `false` if `id` is stale.
    pub fn set_materialized(&self, id: FrameId) -> bool {
        match self.frames.lock().get_mut(id) {
            Some(frame) => {
                frame.state = FrameState::Resident;
                true
            }
            None => false,
        }
    }

    /// Remove a frame and give its page back to the pool. Returns `false`,
    /// and does nothing, if the frame was already released.
    pub fn release_frame(&self, id: FrameId) -> bool {
        let mut frames = self.frames.lock();
        if frames.get_mut(id).is_none() {
            return false;
        }
        let Some(frame) = frames.remove(id.index as usize) else {
            return false;
        };
        self.free_page(frame.kpage);
        true
    }

    /// Remove every frame owned by `pid`. Returns the user pages they were
    /// mapped at.
    pub fn release_all_for(&self, pid: Pid) -> Vec<VirtAddr> {
        let mut released = Vec::new();
        let mut frames = self.frames.lock();
        for index in 0..frames.slots.len() {
            let owned = frames.slots[index]
                .frame
                .as_ref()
                .is_some_and(|frame| frame.owner.pid() == pid);
            if !owned {
                continue;
            }
            if let Some(frame) = frames.remove(index) {
                self.free_page(frame.kpage);
                released.push(frame.upage);
            }
        }
        released
    }

    fn free_page(&self, kpage: PhysFrame) {
        if !self.memory.free_page(kpage) {
            error!("frame: page {:#x} freed twice", kpage.number());
            panic!("double free of physical page {:#x}", kpage.number());
        }
    }

    /// The resident frame backing `upage` for `pid`, if any.
    pub fn find(&self, pid: Pid, upage: VirtAddr) -> Option<(FrameId, PhysFrame)> {
        let frames = self.frames.lock();
        frames.slots.iter().enumerate().find_map(|(index, slot)| {
            let frame = slot.frame.as_ref()?;
            #[allow(clippy::cast_possible_truncation)]
            let id = FrameId {
                index: index as u32,
                generation: slot.generation,
            };
            (frame.owner.pid() == pid && frame.upage == upage).then_some((id, frame.kpage))
        })
    }

    pub fn frames_in_use(&self) -> usize {
        self.frames.lock().live
    }

    pub fn evictions(&self) -> usize {
        self.evictions.load(Ordering::Relaxed)
    }

    /// The slot the next eviction scan starts from.
    pub fn hand(&self) -> usize {
        self.frames.lock().hand
    }

    pub fn swap(&self) -> &Arc<SwapSpace> {
        &self.swap
    }

    pub fn memory(&self) -> &Arc<dyn PhysicalMemory> {
        &self.memory
    }

    #[cfg(test)]
    fn slot_of(&self, id: FrameId) -> usize {
        id.index as usize
    }
}
