mod common;

use common::{Machine, Process};
use std::sync::Arc;
use std::thread;
use vmcore::fs::memfile::MemoryFile;
use vmcore::mem::pagedir::PageDirectory;
use vmcore::mem::Page;
use vmcore::FaultOutcome;
use vmcore_shared::mem::PAGE_FRAME_SIZE;

const HEAP: usize = 0x0900_0000;
const PAGES: usize = 6;
const ROUNDS: usize = 20;

fn pattern(pid: u16, page: usize, round: usize) -> Box<Page> {
    let mut buf = Box::new([0; PAGE_FRAME_SIZE]);
    #[allow(clippy::cast_possible_truncation)]
    let seed = (usize::from(pid) * 31 + page * 7 + round) as u8;
    for (i, byte) in buf.iter_mut().enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        let offset = i as u8;
        *byte = seed.wrapping_add(offset);
    }
    buf
}

/// Several processes share a frame pool much smaller than their combined
/// working sets. Every page must read back exactly what its owner last
/// wrote, whichever thread evicted it in between.
#[test]
fn processes_thrash_without_losing_data() {
    let m = Arc::new(Machine::new(4, 64));
    let workers: Vec<_> = (1..=4u16)
        .map(|pid| {
            let m = m.clone();
            thread::spawn(move || {
                let p = Process::new(pid);
                let zeros = Arc::new(MemoryFile::new(Vec::new()));
                m.vm.map_segment(&p.space, zeros, 0, HEAP, 0, PAGES * PAGE_FRAME_SIZE, true)
                    .unwrap();

                for round in 0..ROUNDS {
                    for page in 0..PAGES {
                        let upage = HEAP + page * PAGE_FRAME_SIZE;
                        if round > 0 {
                            let back = p.read_page(&m, upage);
                            assert_eq!(back, pattern(pid, page, round - 1));
                        }
                        p.write_page(&m, upage, &pattern(pid, page, round));
                    }
                }
                m.vm.exit_process(&p.space);
                assert_eq!(p.pagedir.mapped(), 0);
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    let stats = m.vm.stats();
    assert_eq!(stats.frames_in_use, 0);
    assert_eq!(stats.swap_slots_in_use, 0);
    assert!(stats.evictions > 0);
    assert_eq!(m.pool.free_pages(), 4);
}

/// A process tearing down while others evict its frames never leaks a
/// frame or a swap slot.
#[test]
fn exit_races_with_eviction() {
    let m = Arc::new(Machine::new(3, 64));
    let workers: Vec<_> = (1..=6u16)
        .map(|pid| {
            let m = m.clone();
            thread::spawn(move || {
                for generation in 0..5 {
                    let p = Process::new(pid * 100 + generation);
                    m.vm.setup_stack(&p.space).unwrap();
                    let zeros = Arc::new(MemoryFile::new(Vec::new()));
                    m.vm.map_segment(&p.space, zeros, 0, HEAP, 0, 3 * PAGE_FRAME_SIZE, true)
                        .unwrap();
                    for page in 0..3 {
                        // Busy frames are waited out, never reported as a
                        // shortage.
                        assert_eq!(
                            p.access(&m, HEAP + page * PAGE_FRAME_SIZE, true),
                            FaultOutcome::Resolved
                        );
                    }
                    m.vm.exit_process(&p.space);
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    let stats = m.vm.stats();
    assert_eq!(stats.frames_in_use, 0);
    assert_eq!(stats.swap_slots_in_use, 0);
    assert_eq!(m.pool.free_pages(), 3);
}
