//! Process-wide block buffer pool
//!
//! Erasure encoding consumes its input in block-size chunks; the pool
//! recycles those buffers across part uploads instead of allocating a
//! fresh megabyte per call. Borrowed buffers are returned on every exit
//! path of the encode loop.

use parking_lot::Mutex;

/// A bounded pool of equally sized byte buffers.
#[derive(Debug)]
pub struct BytePool {
    buf_size: usize,
    capacity: usize,
    bufs: Mutex<Vec<Vec<u8>>>,
}

impl BytePool {
    /// Create a pool handing out buffers of `buf_size` bytes, retaining at
    /// most `capacity` of them between uses.
    pub fn new(buf_size: usize, capacity: usize) -> Self {
        Self {
            buf_size,
            capacity,
            bufs: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    /// Size of the buffers this pool hands out.
    pub fn buf_size(&self) -> usize {
        self.buf_size
    }

    /// Borrow a zero-filled buffer of `buf_size` bytes.
    pub fn get(&self) -> Vec<u8> {
        if let Some(mut buf) = self.bufs.lock().pop() {
            buf.clear();
            buf.resize(self.buf_size, 0);
            return buf;
        }
        vec![0u8; self.buf_size]
    }

    /// Return a buffer. Foreign-sized or surplus buffers are dropped.
    pub fn put(&self, buf: Vec<u8>) {
        if buf.capacity() < self.buf_size {
            return;
        }
        let mut bufs = self.bufs.lock();
        if bufs.len() < self.capacity {
            bufs.push(buf);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_put_recycles() {
        let pool = BytePool::new(64, 2);
        let buf = pool.get();
        assert_eq!(buf.len(), 64);
        pool.put(buf);
        assert_eq!(pool.bufs.lock().len(), 1);

        let again = pool.get();
        assert_eq!(again.len(), 64);
        assert_eq!(pool.bufs.lock().len(), 0);
    }

    #[test]
    fn test_capacity_bound() {
        let pool = BytePool::new(8, 1);
        pool.put(vec![0u8; 8]);
        pool.put(vec![0u8; 8]);
        assert_eq!(pool.bufs.lock().len(), 1);
    }

    #[test]
    fn test_undersized_buffer_dropped() {
        let pool = BytePool::new(8, 4);
        pool.put(vec![0u8; 2]);
        assert!(pool.bufs.lock().is_empty());
    }
}
