use super::{FileError, VmFile};
use crate::sync::mutex::Mutex;
use alloc::vec::Vec;

/// A fixed-length file held in kernel memory.
pub struct MemoryFile {
    data: Mutex<Vec<u8>>,
}

impl MemoryFile {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: Mutex::new(data),
        }
    }

    /// A copy of the file's current contents.
    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

impl VmFile for MemoryFile {
    fn read_at(&self, buf: &mut [u8], offset: usize) -> Result<usize, FileError> {
        let data = self.data.lock();
        if offset > data.len() {
            return Err(FileError::PastEnd {
                offset,
                len: data.len(),
            });
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn write_at(&self, buf: &[u8], offset: usize) -> Result<usize, FileError> {
        let mut data = self.data.lock();
        let len = data.len();
        if offset > len {
            return Err(FileError::PastEnd { offset, len });
        }
        let n = buf.len().min(len - offset);
        data[offset..offset + n].copy_from_slice(&buf[..n]);
        Ok(n)
    }

    fn len(&self) -> usize {
        self.data.lock().len()
    }
}
