//! Software encoder adapter
//!
//! Reads the render stage's output texture back into a pool buffer on
//! the GPU executor (readback is a GPU operation), then lets the cache
//! encoder's thread run the codec. Frames arriving while every pool
//! buffer is in flight are dropped rather than blocking the executor.

use super::{CacheEncoder, EncoderAdapter, EncoderEvents, FrameCodec, SampleSink};
use crate::capture::traits::TextureHandle;
use crate::config::EncoderConfig;
use crate::executor::{GpuContext, GpuExecutor};
use crate::render::RenderStage;
use crate::utils::error::{RecorderError, RecorderResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Bytes per pixel of the readback format (RGBA)
const READBACK_BYTES_PER_PIXEL: usize = 4;

/// GPU-to-CPU pixel transfer collaborator
///
/// Called on the executor thread with the context current.
pub trait PixelReader: Send {
    fn read_pixels(
        &mut self,
        ctx: &mut dyn GpuContext,
        texture: TextureHandle,
        out: &mut [u8],
    ) -> RecorderResult<()>;
}

/// Encoder adapter wrapping a synchronous software codec
pub struct SoftwareVideoEncoder {
    executor: Arc<GpuExecutor>,
    cache: Arc<CacheEncoder>,
    reader: Arc<parking_lot::Mutex<Box<dyn PixelReader>>>,
    frames: Arc<RenderStage>,
    running: Arc<AtomicBool>,
}

impl SoftwareVideoEncoder {
    /// Build the adapter: allocates the frame pool sized from `config`,
    /// spawns the encode thread, and signals readiness through `events`.
    ///
    /// The adapter keeps the render stage rather than a texture handle.
    /// The frame buffer does not exist until the stage's queued init has
    /// run, and its handle changes on resize and filter replacement, so
    /// each readback resolves it fresh on the executor thread.
    pub fn new(
        config: &EncoderConfig,
        frames: Arc<RenderStage>,
        executor: Arc<GpuExecutor>,
        codec: Box<dyn FrameCodec>,
        reader: Box<dyn PixelReader>,
        sink: Arc<dyn SampleSink>,
        events: Arc<dyn EncoderEvents>,
    ) -> RecorderResult<Self> {
        let frame_size =
            config.width as usize * config.height as usize * READBACK_BYTES_PER_PIXEL;
        let cache = CacheEncoder::new(codec, frame_size, super::cache::DEFAULT_CACHE_DEPTH, sink)
            .map_err(|e| RecorderError::Encoder(e.to_string()))?;

        let adapter = Self {
            executor,
            cache: Arc::new(cache),
            reader: Arc::new(parking_lot::Mutex::new(reader)),
            frames,
            running: Arc::new(AtomicBool::new(false)),
        };
        debug!(
            width = config.width,
            height = config.height,
            bitrate = config.bitrate,
            "software encoder built"
        );
        events.on_encoder_ready();
        Ok(adapter)
    }
}

impl EncoderAdapter for SoftwareVideoEncoder {
    fn start(&mut self) -> RecorderResult<()> {
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    fn pause(&mut self) -> RecorderResult<()> {
        self.running.store(false, Ordering::Release);
        Ok(())
    }

    fn stop(&mut self) -> RecorderResult<()> {
        self.running.store(false, Ordering::Release);
        self.cache.stop();
        Ok(())
    }

    fn release(&mut self) -> RecorderResult<()> {
        self.stop()
    }

    fn frame_available(&self) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        let cache = self.cache.clone();
        let reader = self.reader.clone();
        let running = self.running.clone();
        let frames = self.frames.clone();

        // Readback happens on the executor so it is ordered after the
        // draw that produced the frame. The texture handle is resolved
        // here, not at queue time, so it reflects that draw's output.
        let _ = self.executor.queue(move |ctx| {
            if !running.load(Ordering::Acquire) {
                return;
            }
            let texture = frames.frame_buffer_texture();
            let result = cache.try_encode_with(|out| reader.lock().read_pixels(ctx, texture, out));
            if let Err(e) = result {
                debug!("frame not queued for encode: {e}");
            }
        });
    }
}
