//! Pooled byte buffers for the receive and send paths.
//!
//! Every receive rents a fixed-size buffer, and every serialized request is
//! written into a growable pooled buffer. Both return their memory to the
//! shared pool from `Drop`, so a buffer goes back exactly once no matter which
//! path (parse failure, unmatched id, consumer) ends up owning it last.

use parking_lot::Mutex;
use std::io;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Default size of a receive buffer (16 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// Default number of idle buffers the pool keeps around for reuse.
pub const DEFAULT_POOL_CAPACITY: usize = 64;

/// Thread-safe pool of byte buffers.
///
/// Cloning is cheap; all clones share the same idle list and counters.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    idle: Mutex<Vec<Vec<u8>>>,
    capacity: usize,
    rented: AtomicUsize,
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("capacity", &self.inner.capacity)
            .field("rented", &self.rented())
            .field("idle", &self.idle())
            .finish()
    }
}

impl BufferPool {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_POOL_CAPACITY)
    }

    /// Create a pool that retains at most `capacity` idle buffers.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(Vec::with_capacity(capacity)),
                capacity,
                rented: AtomicUsize::new(0),
            }),
        }
    }

    /// Rent a zeroed buffer of exactly `len` bytes.
    pub fn rent(&self, len: usize) -> RentedBuffer {
        let mut data = self.inner.take(len);
        data.resize(len, 0);
        RentedBuffer {
            data,
            pool: Some(self.inner.clone()),
        }
    }

    /// Rent an empty, growable buffer for serializing a request.
    pub fn writer(&self) -> PooledWriter {
        PooledWriter {
            buf: RentedBuffer {
                data: self.inner.take(DEFAULT_BUFFER_SIZE),
                pool: Some(self.inner.clone()),
            },
        }
    }

    /// Number of buffers currently rented out.
    pub fn rented(&self) -> usize {
        self.inner.rented.load(Ordering::Acquire)
    }

    /// Number of idle buffers waiting to be reused.
    pub fn idle(&self) -> usize {
        self.inner.idle.lock().len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolInner {
    /// Hand out an empty vector with at least `min_capacity` bytes of capacity.
    fn take(&self, min_capacity: usize) -> Vec<u8> {
        let reused = {
            let mut idle = self.idle.lock();
            idle.iter()
                .position(|b| b.capacity() >= min_capacity)
                .map(|i| idle.swap_remove(i))
        };
        self.rented.fetch_add(1, Ordering::AcqRel);

        match reused {
            Some(mut data) => {
                data.clear();
                data
            }
            None => Vec::with_capacity(min_capacity),
        }
    }

    fn give_back(&self, mut data: Vec<u8>) {
        self.rented.fetch_sub(1, Ordering::AcqRel);
        data.clear();
        let mut idle = self.idle.lock();
        if idle.len() < self.capacity {
            idle.push(data);
        }
    }
}

/// A buffer rented from a [`BufferPool`].
///
/// The memory goes back to the pool when the value is dropped. The owner
/// handle is taken out on release, so the return happens once.
pub struct RentedBuffer {
    data: Vec<u8>,
    pool: Option<Arc<PoolInner>>,
}

impl RentedBuffer {
    /// A buffer that is not backed by any pool.
    pub fn unpooled(data: Vec<u8>) -> Self {
        Self { data, pool: None }
    }

    pub fn is_pooled(&self) -> bool {
        self.pool.is_some()
    }
}

impl Deref for RentedBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for RentedBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl std::fmt::Debug for RentedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RentedBuffer")
            .field("len", &self.data.len())
            .field("pooled", &self.is_pooled())
            .finish()
    }
}

impl Drop for RentedBuffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.give_back(std::mem::take(&mut self.data));
        }
    }
}

/// Growable pooled send buffer.
///
/// Requests are serialized straight into it through [`io::Write`]; the frame
/// payload is exactly the written region, so the channel can send it without
/// another copy.
pub struct PooledWriter {
    buf: RentedBuffer,
}

impl PooledWriter {
    /// The bytes written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf.data
    }

    pub fn len(&self) -> usize {
        self.buf.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.data.is_empty()
    }

    /// Forget the written bytes but keep the memory.
    pub fn clear(&mut self) {
        self.buf.data.clear();
    }
}

impl io::Write for PooledWriter {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.buf.data.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.buf.data.extend_from_slice(bytes);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for PooledWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledWriter")
            .field("len", &self.len())
            .finish()
    }
}
