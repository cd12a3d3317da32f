//! Pool-driven encode bridge
//!
//! `CacheEncoder` decouples frame production from codec throughput: a
//! producer copies raw frames into pool buffers, a dedicated encode
//! thread drains them through a [`FrameCodec`], recycles each buffer, and
//! routes compressed output to the registered [`SampleSink`].

use super::{FrameCodec, SampleKind, SampleSink};
use crate::pool::{BufferPool, PoolError};
use crate::utils::error::RecorderResult;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, trace};

/// Default number of in-flight frame buffers
pub const DEFAULT_CACHE_DEPTH: usize = 5;

/// Bridge between a frame producer and a synchronous codec thread
pub struct CacheEncoder {
    pool: Arc<BufferPool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CacheEncoder {
    /// Create the pool and spawn the encode thread.
    pub fn new(
        mut codec: Box<dyn FrameCodec>,
        frame_size: usize,
        capacity: usize,
        sink: Arc<dyn SampleSink>,
    ) -> Result<Self, PoolError> {
        let pool = Arc::new(BufferPool::new(frame_size, capacity)?);

        let worker_pool = pool.clone();
        let worker = std::thread::Builder::new()
            .name("cache-encoder".into())
            .spawn(move || {
                loop {
                    let buffer = match worker_pool.take_ready() {
                        Ok(buffer) => buffer,
                        Err(PoolError::Shutdown) => break,
                        Err(e) => {
                            error!("encode thread pool error: {e}");
                            break;
                        }
                    };
                    let result = codec.encode(buffer.as_slice());
                    worker_pool.recycle(buffer);
                    match result {
                        Ok(Some(sample)) => {
                            if sample.kind == SampleKind::Config {
                                sink.on_format_changed(codec.format());
                            } else {
                                sink.on_sample(sample);
                            }
                        }
                        Ok(None) => {}
                        Err(e) => error!("codec failed on frame: {e}"),
                    }
                }
                codec.release();
                debug!("encode thread exiting");
            })
            .map_err(|e| PoolError::InvalidConfig(format!("spawn encode thread: {e}")))?;

        Ok(Self {
            pool,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Producer side with backpressure: blocks while all buffers are in
    /// flight. For callers on their own thread.
    pub fn encode(&self, src: &[u8]) -> Result<(), PoolError> {
        let mut buffer = self.pool.borrow_free()?;
        let len = src.len().min(buffer.len());
        buffer.as_mut_slice()[..len].copy_from_slice(&src[..len]);
        self.pool.publish(buffer);
        Ok(())
    }

    /// Non-blocking producer side: fills a free buffer via `fill`, or
    /// drops the frame (returning `Ok(false)`) when the pool is
    /// exhausted. For callers inside executor tasks, where blocking would
    /// stall the whole pipeline.
    pub fn try_encode_with<F>(&self, fill: F) -> Result<bool, PoolError>
    where
        F: FnOnce(&mut [u8]) -> RecorderResult<()>,
    {
        let Some(mut buffer) = self.pool.try_borrow_free()? else {
            trace!("encode cache exhausted, dropping frame");
            return Ok(false);
        };
        if let Err(e) = fill(buffer.as_mut_slice()) {
            error!("frame fill failed: {e}");
            self.pool.recycle(buffer);
            return Ok(false);
        }
        self.pool.publish(buffer);
        Ok(true)
    }

    /// Shut the pool down and join the encode thread. Buffers already
    /// published are still encoded before the thread exits. Idempotent.
    pub fn stop(&self) {
        self.pool.shutdown();
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                error!("encode thread panicked during shutdown");
            }
        }
    }

    /// `(free, ready, capacity)` snapshot of the underlying pool
    pub fn stats(&self) -> (usize, usize, usize) {
        self.pool.stats()
    }
}

impl Drop for CacheEncoder {
    fn drop(&mut self) {
        self.stop();
    }
}
