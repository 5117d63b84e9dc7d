//! The slice of the file layer the virtual memory core depends on.
//!
//! Executables and memory-mapped files are read and written at byte offsets.
//! Files never grow through this interface.

pub mod memfile;

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FileError {
    #[error("i/o error")]
    Io,
    #[error("offset {offset} is past the end of the file ({len} bytes)")]
    PastEnd { offset: usize, len: usize },
}

/// An open file, shared between the process's descriptor table and any
/// mappings built on it.
pub trait VmFile: Send + Sync {
    /// Read up to `buf.len()` bytes starting at `offset`. Returns the number of
    /// bytes read, which is short only at end of file.
    fn read_at(&self, buf: &mut [u8], offset: usize) -> Result<usize, FileError>;

    /// Write up to `buf.len()` bytes starting at `offset`. Writes stop at the
    /// current end of file.
    fn write_at(&self, buf: &[u8], offset: usize) -> Result<usize, FileError>;

    /// Length of the file in bytes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
