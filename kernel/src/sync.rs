//! Kernel synchronization primitives.
//!
//! Everything here spins rather than sleeping: the virtual memory core has no
//! access to the scheduler, and every critical section it takes is short
//! except the per-process page lock, which is only contended by eviction.

pub mod intr;
pub mod mutex;
pub mod semaphore;

/// Back off while another CPU finishes what we are waiting for.
pub fn relax() {
    #[cfg(target_os = "none")]
    core::hint::spin_loop();
    #[cfg(not(target_os = "none"))]
    std::thread::yield_now();
}
