//! Reusable I/O buffer pool.
//!
//! Sessions borrow fixed-size buffers for handshake reads and relay
//! copies instead of allocating per connection. Release is tied to guard
//! drop, so a buffer goes back to the pool on every exit path, including
//! early protocol-error returns.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;

/// A concurrency-safe pool of fixed-size byte buffers.
///
/// [`acquire`](BufferPool::acquire) never fails: it pops a free buffer or
/// allocates a fresh one on demand. The pool retains at most `max_idle`
/// free buffers; beyond that, returned buffers are simply freed.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    free: Mutex<Vec<Vec<u8>>>,
    buf_size: usize,
    max_idle: usize,
}

impl BufferPool {
    /// Create a pool handing out buffers of exactly `buf_size` bytes.
    pub fn new(buf_size: usize, max_idle: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::with_capacity(max_idle)),
                buf_size,
                max_idle,
            }),
        }
    }

    /// Get a buffer, reusing a pooled one when available.
    ///
    /// The buffer is owned by the returned guard and comes back to the
    /// pool when the guard drops. Contents are not cleared between users;
    /// a buffer's content is only meaningful for a single copy operation.
    pub fn acquire(&self) -> PooledBuf {
        let buf = self
            .inner
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| vec![0u8; self.inner.buf_size]);

        PooledBuf {
            buf: Some(buf),
            pool: Arc::clone(&self.inner),
        }
    }

    /// Size of every buffer this pool hands out.
    pub fn buf_size(&self) -> usize {
        self.inner.buf_size
    }

    /// Number of free buffers currently held.
    pub fn idle_count(&self) -> usize {
        self.inner.free.lock().len()
    }
}

/// A buffer borrowed from a [`BufferPool`].
///
/// Dereferences to `[u8]`. Returned to its pool on drop.
pub struct PooledBuf {
    buf: Option<Vec<u8>>,
    pool: Arc<PoolInner>,
}

impl Deref for PooledBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match &self.buf {
            Some(buf) => buf,
            None => &[],
        }
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        match &mut self.buf {
            Some(buf) => buf,
            None => &mut [],
        }
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            let mut free = self.pool.free.lock();
            if free.len() < self.pool.max_idle {
                free.push(buf);
            }
        }
    }
}
