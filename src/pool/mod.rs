//! Frame buffer pool
//!
//! Fixed-capacity pool of reusable fixed-size buffers decoupling a
//! producer thread from a consumer thread with bounded memory. A slow
//! consumer stalls the producer in [`BufferPool::borrow_free`] instead of
//! causing unbounded allocation; shutdown wakes every blocked waiter with
//! a cancellation signal.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use thiserror::Error;

/// Errors returned by pool operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The pool was shut down while the caller was waiting (or before it
    /// called); no buffer can be borrowed any more.
    #[error("buffer pool has been shut down")]
    Shutdown,

    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
}

/// A reusable buffer on loan from a [`BufferPool`]
///
/// The buffer keeps its slot index for the lifetime of the pool and is
/// never reallocated in steady state. Contents are whatever the last
/// producer wrote; they are never assumed zeroed.
#[derive(Debug, PartialEq, Eq)]
pub struct PooledBuffer {
    slot: usize,
    data: Vec<u8>,
}

impl PooledBuffer {
    /// Stable identity of this buffer within its pool
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug)]
struct Shared {
    free: VecDeque<PooledBuffer>,
    ready: VecDeque<PooledBuffer>,
    shutdown: bool,
}

/// Fixed-capacity pool of reusable frame buffers
///
/// One producer role (`borrow_free`/`publish`) and one consumer role
/// (`take_ready`/`recycle`) per instance; a second producer would race on
/// publish ordering. A buffer is always in exactly one place: the free
/// set, the ready queue, or a caller's hands.
#[derive(Debug)]
pub struct BufferPool {
    shared: Mutex<Shared>,
    free_available: Condvar,
    ready_available: Condvar,
    buffer_size: usize,
    capacity: usize,
}

impl BufferPool {
    /// Create a pool of `capacity` buffers of `buffer_size` bytes, all
    /// initially free.
    pub fn new(buffer_size: usize, capacity: usize) -> Result<Self, PoolError> {
        if buffer_size == 0 {
            return Err(PoolError::InvalidConfig(
                "buffer size must be positive".into(),
            ));
        }
        if capacity == 0 {
            return Err(PoolError::InvalidConfig(
                "capacity must be positive".into(),
            ));
        }

        let free = (0..capacity)
            .map(|slot| PooledBuffer {
                slot,
                data: vec![0u8; buffer_size],
            })
            .collect();

        Ok(Self {
            shared: Mutex::new(Shared {
                free,
                ready: VecDeque::with_capacity(capacity),
                shutdown: false,
            }),
            free_available: Condvar::new(),
            ready_available: Condvar::new(),
            buffer_size,
            capacity,
        })
    }

    /// Borrow an unused buffer, blocking until one is free.
    ///
    /// This is the central backpressure point: a producer that outruns the
    /// consumer parks here until `recycle` frees a buffer. Returns
    /// [`PoolError::Shutdown`] once the pool is shut down.
    pub fn borrow_free(&self) -> Result<PooledBuffer, PoolError> {
        let mut shared = self.shared.lock();
        loop {
            if shared.shutdown {
                return Err(PoolError::Shutdown);
            }
            if let Some(buffer) = shared.free.pop_front() {
                return Ok(buffer);
            }
            self.free_available.wait(&mut shared);
        }
    }

    /// Non-blocking variant of [`borrow_free`](Self::borrow_free).
    ///
    /// Returns `Ok(None)` when no buffer is free right now. Used where
    /// blocking is not allowed (inside executor tasks) and the frame is
    /// dropped instead.
    pub fn try_borrow_free(&self) -> Result<Option<PooledBuffer>, PoolError> {
        let mut shared = self.shared.lock();
        if shared.shutdown {
            return Err(PoolError::Shutdown);
        }
        Ok(shared.free.pop_front())
    }

    /// Producer side: mark a filled buffer ready and hand it to the
    /// consumer (FIFO).
    pub fn publish(&self, buffer: PooledBuffer) {
        let mut shared = self.shared.lock();
        shared.ready.push_back(buffer);
        drop(shared);
        self.ready_available.notify_one();
    }

    /// Consumer side: block until a ready buffer exists and return the
    /// oldest one.
    ///
    /// During shutdown, buffers already published are still drained;
    /// [`PoolError::Shutdown`] is returned once the ready queue is empty.
    pub fn take_ready(&self) -> Result<PooledBuffer, PoolError> {
        let mut shared = self.shared.lock();
        loop {
            if let Some(buffer) = shared.ready.pop_front() {
                return Ok(buffer);
            }
            if shared.shutdown {
                return Err(PoolError::Shutdown);
            }
            self.ready_available.wait(&mut shared);
        }
    }

    /// Consumer side: return a drained buffer to the free set, waking any
    /// producer blocked in `borrow_free`.
    pub fn recycle(&self, buffer: PooledBuffer) {
        let mut shared = self.shared.lock();
        shared.free.push_back(buffer);
        drop(shared);
        self.free_available.notify_one();
    }

    /// Wake every blocked caller with a cancellation signal. No buffer may
    /// be borrowed afterwards.
    pub fn shutdown(&self) {
        let mut shared = self.shared.lock();
        shared.shutdown = true;
        drop(shared);
        self.free_available.notify_all();
        self.ready_available.notify_all();
    }

    /// `(free, ready, capacity)` snapshot, for logging only
    pub fn stats(&self) -> (usize, usize, usize) {
        let shared = self.shared.lock();
        (shared.free.len(), shared.ready.len(), self.capacity)
    }

    /// Size of each buffer in bytes
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
