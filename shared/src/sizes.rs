use crate::mem::PAGE_FRAME_SIZE;

pub const KB: usize = 1024;
pub const MB: usize = KB * KB;

/// Size of one block device sector in bytes.
pub const SECTOR_SIZE: u32 = 512;

/// Sectors needed to hold one page frame.
pub const SECTORS_PER_PAGE: u32 = PAGE_FRAME_SIZE as u32 / SECTOR_SIZE;

/// Default size of the swap partition, in sectors (4 MB).
pub const SWAP_SECTORS: u32 = 8192;
pub const SWAP_SIZE: u32 = SECTOR_SIZE * SWAP_SECTORS;

/// Number of page-sized swap slots in a default swap partition.
pub const SWAP_SLOTS: u32 = SWAP_SECTORS / SECTORS_PER_PAGE;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_is_whole_sectors() {
        assert_eq!(PAGE_FRAME_SIZE % SECTOR_SIZE as usize, 0);
        assert_eq!(SECTORS_PER_PAGE, 8);
        assert_eq!(SWAP_SLOTS, 1024);
        assert_eq!(SWAP_SIZE as usize, 4 * MB);
    }
}
