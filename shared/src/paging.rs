// https://wiki.osdev.org/Paging
// https://wiki.osdev.org/Exceptions#Page_Fault

// Avoids lots of warnings about casting usize to u32 which cannot result in
// truncation on a 32-bit platform, which is all we support. It would be nice if
// you could tell clippy that you were only dealing with 32-bit usizes...
#![allow(clippy::cast_possible_truncation)]

use arbitrary_int::{u10, u12, u20};
use bitbybit::bitfield;

/// A hardware page table entry. The MMU sets `accessed` on every access
/// through the mapping and `dirty` on every write; the kernel clears them.
#[bitfield(u32, default = 0)]
pub struct PageTableEntry {
    #[bit(0, rw)]
    present: bool,
    #[bit(1, rw)]
    read_write: bool,
    #[bit(2, rw)]
    user_supervisor: bool,
    #[bit(3, rw)]
    write_through: bool,
    #[bit(4, rw)]
    cache_disable: bool,
    #[bit(5, rw)]
    accessed: bool,
    #[bit(6, rw)]
    dirty: bool,
    #[bit(7, rw)]
    page_attribute_table: bool,
    #[bit(8, rw)]
    global: bool,
    #[bits(12..=31, rw)]
    page_frame_address: u20,
}

impl PageTableEntry {
    /// A present user mapping of frame number `frame`.
    pub fn user_mapping(frame: usize, writable: bool) -> Self {
        Self::DEFAULT
            .with_present(true)
            .with_user_supervisor(true)
            .with_read_write(writable)
            .with_page_frame_address(u20::new(frame as u32))
    }

    /// The frame number this entry points at.
    pub fn frame_number(&self) -> usize {
        self.page_frame_address().value() as usize
    }
}

#[bitfield(u32)]
pub struct VirtualAddress {
    #[bits(22..=31, r)]
    page_directory_index: u10,
    #[bits(12..=21, r)]
    page_table_index: u10,
    #[bits(0..=11, r)]
    offset: u12,
}

/// The error code pushed by the CPU on a page fault (vector 14).
#[bitfield(u32, default = 0)]
pub struct PageFaultErrorCode {
    /// Clear: the page was not present. Set: a protection violation.
    #[bit(0, rw)]
    present: bool,
    /// The access was a write.
    #[bit(1, rw)]
    write: bool,
    /// The access came from user mode.
    #[bit(2, rw)]
    user: bool,
}
