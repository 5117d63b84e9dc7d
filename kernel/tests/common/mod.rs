#![allow(dead_code)]

use std::sync::Arc;
use vmcore::block::block_core::{Block, BlockType};
use vmcore::drivers::memory_device::MemoryDevice;
use vmcore::mem::pagedir::{FlatPageDirectory, PageDirectory};
use vmcore::mem::user_pool::UserPool;
use vmcore::mem::{Page, PhysFrame, PhysicalMemory, VirtAddr};
use vmcore::vm::address_space::{AddressSpace, Pid};
use vmcore::{FaultOutcome, Vm, VmConfig};
use vmcore_shared::mem::{pg_round_down, PAGE_FRAME_SIZE};
use vmcore_shared::paging::PageFaultErrorCode;
use vmcore_shared::sizes::SECTORS_PER_PAGE;

pub struct Machine {
    pub vm: Vm,
    pub pool: Arc<UserPool>,
}

impl Machine {
    pub fn new(frames: usize, swap_slots: u32) -> Self {
        Self::with_config(frames, swap_slots, VmConfig::default())
    }

    pub fn with_config(frames: usize, swap_slots: u32, config: VmConfig) -> Self {
        let pool = Arc::new(UserPool::new(PhysFrame::from_number(0x800), frames));
        let sectors = swap_slots * SECTORS_PER_PAGE;
        let swap = Block::new(
            BlockType::Swap,
            "hd0:1",
            sectors,
            Box::new(MemoryDevice::new(sectors)),
        );
        Self {
            vm: Vm::new(config, pool.clone(), swap),
            pool,
        }
    }
}

pub struct Process {
    pub space: Arc<AddressSpace>,
    pub pagedir: Arc<FlatPageDirectory>,
}

impl Process {
    pub fn new(pid: Pid) -> Self {
        let pagedir = Arc::new(FlatPageDirectory::new());
        Self {
            space: AddressSpace::new(pid, pagedir.clone()),
            pagedir,
        }
    }

    pub fn pid(&self) -> Pid {
        self.space.pid()
    }

    /// Access `addr` from user mode the way the CPU would, faulting until the
    /// access goes through. Another thread may evict the page between the
    /// fault and the retry, just as on real hardware.
    pub fn access(&self, m: &Machine, addr: VirtAddr, write: bool) -> FaultOutcome {
        loop {
            if self.pagedir.touch(addr, write) {
                return FaultOutcome::Resolved;
            }
            let outcome = self.fault(m, addr, write);
            if outcome != FaultOutcome::Resolved {
                return outcome;
            }
        }
    }

    fn fault(&self, m: &Machine, addr: VirtAddr, write: bool) -> FaultOutcome {
        let code = PageFaultErrorCode::DEFAULT
            .with_present(self.pagedir.is_mapped(pg_round_down(addr)))
            .with_write(write)
            .with_user(true);
        m.vm.handle_fault(&self.space, addr, self.space.user_esp(), code)
    }

    /// Run `f` on the frame behind `addr` once an access to it succeeds.
    ///
    /// The process's page table is held while `f` runs so no other thread
    /// can evict the frame between the access and the copy, which the CPU
    /// does as one step.
    fn with_frame<R>(
        &self,
        m: &Machine,
        addr: VirtAddr,
        write: bool,
        f: impl FnOnce(PhysFrame) -> R,
    ) -> R {
        loop {
            {
                let _pages = self.space.pages();
                if self.pagedir.touch(addr, write) {
                    let (_, kpage) = m.vm.frames().find(self.pid(), pg_round_down(addr)).unwrap();
                    return f(kpage);
                }
            }
            assert_eq!(self.fault(m, addr, write), FaultOutcome::Resolved);
        }
    }

    /// Store `page` over the page containing `addr` as a user write would.
    pub fn write_page(&self, m: &Machine, addr: VirtAddr, page: &Page) {
        self.with_frame(m, addr, true, |kpage| m.pool.copy_in(kpage, page));
    }

    /// Load the page containing `addr` as a user read would.
    pub fn read_page(&self, m: &Machine, addr: VirtAddr) -> Box<Page> {
        self.with_frame(m, addr, false, |kpage| {
            let mut page = Box::new([0; PAGE_FRAME_SIZE]);
            m.pool.copy_out(kpage, &mut page);
            page
        })
    }
}

pub fn filled(byte: u8) -> Box<Page> {
    Box::new([byte; PAGE_FRAME_SIZE])
}
