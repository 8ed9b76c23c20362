
use crate::core::constants::PAGE_SIZE;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

/// Pool of page-sized byte buffers. Buffers are zeroed on acquisition, not
/// on release, and the pool grows without bound.
pub struct BufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self {
            buffers: Mutex::new(Vec::new()),
        }
    }

    /// Returns a zeroed page buffer.
    pub fn get(self: &Arc<Self>) -> PageBuf {
        let mut buf = self.take();
        buf.fill(0);
        PageBuf {
            buf: Some(buf),
            pool: Arc::clone(self),
        }
    }

    /// Returns a buffer without zeroing it. The caller must overwrite the
    /// full page before reading from it.
    pub(crate) fn get_unzeroed(self: &Arc<Self>) -> PageBuf {
        PageBuf {
            buf: Some(self.take()),
            pool: Arc::clone(self),
        }
    }

    fn take(&self) -> Vec<u8> {
        if let Ok(mut buffers) = self.buffers.lock() {
            buffers.pop().unwrap_or_else(|| vec![0u8; PAGE_SIZE])
        } else {
            vec![0u8; PAGE_SIZE]
        }
    }

    fn put(&self, buf: Vec<u8>) {
        if buf.len() != PAGE_SIZE {
            return;
        }
        if let Ok(mut buffers) = self.buffers.lock() {
            buffers.push(buf);
        }
    }

    pub fn len(&self) -> usize {
        self.buffers.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

/// A pooled page buffer. Returns itself to the pool on drop, so release
/// happens on every exit path.
pub struct PageBuf {
    buf: Option<Vec<u8>>,
    pool: Arc<BufferPool>,
}

impl Deref for PageBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PageBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PageBuf {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.put(buf);
        }
    }
}
