pub mod frame_table;
pub mod pagedir;
pub mod supplemental;
pub mod swap;
pub mod user_pool;

use vmcore_shared::mem::PAGE_FRAME_SIZE;

/// A user virtual address.
pub type VirtAddr = usize;

/// The contents of one page frame.
pub type Page = [u8; PAGE_FRAME_SIZE];

/// A physical page frame, identified by its frame number (its physical
/// address shifted right by 12).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhysFrame(usize);

impl PhysFrame {
    pub const fn from_number(number: usize) -> Self {
        Self(number)
    }

    pub const fn number(self) -> usize {
        self.0
    }

    pub const fn start_address(self) -> usize {
        self.0 * PAGE_FRAME_SIZE
    }
}

/// The user page pool: hands out single physical pages for user mappings and
/// gives the kernel access to their bytes.
pub trait PhysicalMemory: Send + Sync {
    /// Allocate one page, or `None` if the pool is exhausted.
    fn alloc_page(&self) -> Option<PhysFrame>;

    /// Return a page to the pool. Returns `false` if the page was not
    /// allocated, in which case nothing happens.
    fn free_page(&self, frame: PhysFrame) -> bool;

    /// Run `f` with exclusive access to the page's bytes.
    fn with_page(&self, frame: PhysFrame, f: &mut dyn FnMut(&mut Page));

    fn copy_out(&self, frame: PhysFrame, buf: &mut Page) {
        self.with_page(frame, &mut |page: &mut Page| buf.copy_from_slice(&page[..]));
    }

    fn copy_in(&self, frame: PhysFrame, buf: &Page) {
        self.with_page(frame, &mut |page: &mut Page| page.copy_from_slice(&buf[..]));
    }

    fn zero(&self, frame: PhysFrame) {
        self.with_page(frame, &mut |page: &mut Page| page.fill(0));
    }
}
