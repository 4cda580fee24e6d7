//! Buffer pool
//!
//! Reusable byte buffers for cluster I/O. A buffer is borrowed as a
//! [`PooledBuffer`] guard and handed back when the guard drops, so it returns
//! to the pool on every exit path.

use bytes::BytesMut;
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A bounded pool of idle buffers
#[derive(Debug)]
pub struct BufferPool {
    idle: Mutex<Vec<BytesMut>>,
    capacity: usize,
    retain_limit: usize,
    outstanding: AtomicUsize,
}

impl BufferPool {
    /// Create a pool that keeps at most `capacity` idle buffers, none larger
    /// than `retain_limit` bytes
    pub fn new(capacity: usize, retain_limit: usize) -> Arc<Self> {
        Arc::new(Self {
            idle: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            retain_limit,
            outstanding: AtomicUsize::new(0),
        })
    }

    /// Borrow a zeroed buffer of exactly `len` bytes
    pub fn take(self: &Arc<Self>, len: usize) -> PooledBuffer {
        let mut buf = self.idle.lock().pop().unwrap_or_default();
        buf.clear();
        buf.resize(len, 0);
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        PooledBuffer {
            buf,
            pool: Arc::clone(self),
        }
    }

    fn give_back(&self, mut buf: BytesMut) {
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
        if buf.capacity() > self.retain_limit {
            return;
        }
        buf.clear();
        let mut idle = self.idle.lock();
        if idle.len() < self.capacity {
            idle.push(buf);
        }
    }

    /// Idle buffers ready for reuse
    pub fn available(&self) -> usize {
        self.idle.lock().len()
    }

    /// Buffers currently borrowed
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }
}

/// A buffer borrowed from a [`BufferPool`]
pub struct PooledBuffer {
    buf: BytesMut,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuffer {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.pool.give_back(std::mem::take(&mut self.buf));
    }
}
