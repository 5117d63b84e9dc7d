use crate::paging::VirtualAddress;
use crate::sizes::KB;

// Page size is 4KB. This is a property of x86 processors.
pub const PAGE_FRAME_SIZE: usize = 4 * KB;

// Any virtual address at or above OFFSET is a kernel address. User stacks
// grow down from here.
pub const OFFSET: usize = 0x80000000;

/// Byte offset of `addr` within its page.
#[inline]
pub fn pg_offset(addr: usize) -> usize {
    // Truncation is fine: the offset lives in the low 12 bits.
    #[allow(clippy::cast_possible_truncation)]
    let va = VirtualAddress::new_with_raw_value(addr as u32);
    va.offset().value() as usize
}

/// Round `addr` down to the start of its page.
#[inline]
pub const fn pg_round_down(addr: usize) -> usize {
    addr & !(PAGE_FRAME_SIZE - 1)
}

/// Round `addr` up to the next page boundary.
#[inline]
pub const fn pg_round_up(addr: usize) -> usize {
    pg_round_down(addr + PAGE_FRAME_SIZE - 1)
}

#[inline]
pub const fn is_page_aligned(addr: usize) -> bool {
    addr % PAGE_FRAME_SIZE == 0
}

/// Whether `addr` is in the user half of the address space.
#[inline]
pub const fn is_user_vaddr(addr: usize) -> bool {
    addr < OFFSET
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rounding() {
        assert_eq!(pg_round_down(0x0804_8123), 0x0804_8000);
        assert_eq!(pg_round_up(0x0804_8123), 0x0804_9000);
        assert_eq!(pg_round_up(0x0804_8000), 0x0804_8000);
        assert_eq!(pg_offset(0x0804_8123), 0x123);
        assert!(is_page_aligned(OFFSET - PAGE_FRAME_SIZE));
        assert!(!is_page_aligned(OFFSET - 4));
    }

    #[test]
    fn test_user_split() {
        assert!(is_user_vaddr(OFFSET - 1));
        assert!(!is_user_vaddr(OFFSET));
    }
}
