//! The kernel's mutual-exclusion lock.
//!
//! `Mutex` is a FIFO ticket lock when the `ticket_mutex` feature is on (the
//! default) and a plain test-and-set spinlock otherwise. Both hand out guards
//! that release on drop.

mod spin;
mod ticket;

pub use self::spin::{SpinMutex, SpinMutexGuard};
pub use self::ticket::{TicketMutex, TicketMutexGuard};

#[cfg(feature = "ticket_mutex")]
pub type Mutex<T> = TicketMutex<T>;
#[cfg(feature = "ticket_mutex")]
pub type MutexGuard<'a, T> = TicketMutexGuard<'a, T>;

#[cfg(not(feature = "ticket_mutex"))]
pub type Mutex<T> = SpinMutex<T>;
#[cfg(not(feature = "ticket_mutex"))]
pub type MutexGuard<'a, T> = SpinMutexGuard<'a, T>;
