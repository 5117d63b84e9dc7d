use std::sync::Arc;
use vmcore::block::block_core::{Block, BlockType};
use vmcore::drivers::memory_device::MemoryDevice;
use vmcore::mem::user_pool::UserPool;
use vmcore::mem::PhysFrame;
use vmcore::vm::{self, Vm, VmConfig};

// The only test in this binary, since the instance can be installed once.
#[test]
fn install_global_instance() {
    assert!(vm::try_vm().is_none());

    let pool = Arc::new(UserPool::new(PhysFrame::from_number(0x800), 16));
    let swap = Block::new(BlockType::Swap, "hd1:0", 8192, Box::new(MemoryDevice::new(8192)));
    vm::init(Vm::new(VmConfig::default(), pool, swap));

    let installed = vm::vm();
    assert_eq!(installed.swap().capacity(), 1024);
    assert_eq!(installed.config().max_stack_pages, 2000);
    assert_eq!(installed.stats(), vm::VmStats {
        free_swap_sectors: 8192,
        ..Default::default()
    });
    assert!(std::ptr::eq(installed, vm::try_vm().unwrap()));
    installed.print_stats();
}
