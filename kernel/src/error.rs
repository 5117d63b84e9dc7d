use crate::block::block_error::BlockError;
use crate::fs::FileError;
use thiserror::Error;

/// Everything that can go wrong while resolving a fault or changing a
/// process's address space. None of these are fatal to the kernel: each
/// one terminates the process on whose behalf the work was done.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// No free physical frame and no frame that could ever be evicted.
    #[error("out of physical frames")]
    OutOfFrames,
    /// Eviction needed a swap slot and there was none.
    #[error("out of swap space")]
    OutOfSwap,
    /// A fault with no supplemental entry that is not stack growth.
    #[error("invalid access at {addr:#x}")]
    InvalidAccess { addr: usize },
    /// A protection fault on a present page, e.g. writing read-only text.
    #[error("write to read-only page at {addr:#x}")]
    ReadOnly { addr: usize },
    /// The backing file held fewer bytes than the entry promised.
    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },
    /// The backing file took fewer bytes than a write-back needed.
    #[error("short write: expected {expected} bytes, wrote {actual}")]
    ShortWrite { expected: usize, actual: usize },
    #[error("page {addr:#x} is already mapped")]
    AlreadyMapped { addr: usize },
    #[error("no mapping starts at {addr:#x}")]
    NotMapped { addr: usize },
    #[error("address {addr:#x} is not page aligned")]
    Misaligned { addr: usize },
    /// A mapping request with a null address, zero length or a range that
    /// leaves user space.
    #[error("invalid mapping request")]
    BadMapping,
    #[error("block device: {0}")]
    Block(#[from] BlockError),
    #[error("file: {0}")]
    File(#[from] FileError),
}
