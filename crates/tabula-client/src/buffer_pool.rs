//! Reusable buffers for outgoing frames.
//!
//! Every request encodes its frame into a `BytesMut` before writing it to
//! the socket. The pool hands those buffers back out so steady traffic
//! does not allocate per request. It is a bounded lock-free queue: when it
//! is empty a fresh buffer is allocated, when it is full returned buffers
//! are dropped. Buffers that grew past `max_retained` while encoding a
//! large frame are dropped too, so one big request does not pin memory.

use bytes::BytesMut;
use crossbeam_queue::ArrayQueue;

/// Default initial capacity of a frame buffer.
pub const DEFAULT_FRAME_CAPACITY: usize = 8 * 1024;

/// Default largest capacity a returned buffer may have.
pub const DEFAULT_MAX_RETAINED: usize = 1024 * 1024;

pub struct FrameBufferPool {
    pool: ArrayQueue<BytesMut>,
    initial_capacity: usize,
    max_retained: usize,
}

impl FrameBufferPool {
    /// Creates a pool holding at most `slots` idle buffers (at least one).
    pub fn new(slots: usize) -> Self {
        Self::with_capacities(slots, DEFAULT_FRAME_CAPACITY, DEFAULT_MAX_RETAINED)
    }

    pub fn with_capacities(slots: usize, initial_capacity: usize, max_retained: usize) -> Self {
        Self {
            pool: ArrayQueue::new(slots.max(1)),
            initial_capacity,
            max_retained: max_retained.max(initial_capacity),
        }
    }

    /// Pops an idle buffer or allocates one.
    pub fn get(&self) -> BytesMut {
        self.pool
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.initial_capacity))
    }

    /// Returns a buffer to the pool.
    pub fn put(&self, mut buf: BytesMut) {
        if buf.capacity() > self.max_retained {
            return;
        }
        buf.clear();
        // Full pool: drop it.
        let _ = self.pool.push(buf);
    }

    /// Number of idle buffers.
    pub fn available(&self) -> usize {
        self.pool.len()
    }
}

impl Default for FrameBufferPool {
    fn default() -> Self {
        Self::new(64)
    }
}
