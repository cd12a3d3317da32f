//! Render stage
//!
//! Turns incoming camera frames into filtered output textures on the GPU
//! executor. Frames arriving faster than the executor can draw are
//! coalesced latest-wins: at most one draw is ever pending, and a newer
//! camera texture replaces the one waiting to be drawn.
//!
//! The active filter and its output texture handle are guarded by a
//! single mutex; `set_filter` (writer) and `frame_buffer_texture` /
//! draw (readers) may be invoked from different call paths. The lock
//! covers the filter reference only; GPU calls are already serialized by
//! the executor.

pub mod filter;
pub mod fps;

use crate::capture::traits::{SurfaceDescriptor, TextureHandle};
use crate::executor::GpuExecutor;
use crate::utils::error::RecorderResult;
use filter::Filter;
use fps::FpsMeasurer;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, trace};

struct FilterSlot {
    filter: Box<dyn Filter>,
    output: TextureHandle,
}

struct RenderShared {
    slot: Mutex<FilterSlot>,
    surface: Mutex<Option<SurfaceDescriptor>>,
    size: Mutex<(u32, u32)>,
    /// Latest camera texture waiting to be drawn (latest-wins)
    latest_frame: Mutex<Option<TextureHandle>>,
    draw_pending: AtomicBool,
    dropped_frames: AtomicU64,
    fps: Mutex<FpsMeasurer>,
}

/// GPU-bound filter stage between capture and encode
pub struct RenderStage {
    executor: Arc<GpuExecutor>,
    shared: Arc<RenderShared>,
}

impl RenderStage {
    pub fn new(executor: Arc<GpuExecutor>, filter: Box<dyn Filter>) -> Self {
        Self {
            executor,
            shared: Arc::new(RenderShared {
                slot: Mutex::new(FilterSlot {
                    filter,
                    output: TextureHandle::default(),
                }),
                surface: Mutex::new(None),
                size: Mutex::new((0, 0)),
                latest_frame: Mutex::new(None),
                draw_pending: AtomicBool::new(false),
                dropped_frames: AtomicU64::new(0),
                fps: Mutex::new(FpsMeasurer::new()),
            }),
        }
    }

    /// Queue initialization: bind the output surface and size the filter
    /// chain to `width` x `height`.
    pub fn start(
        &self,
        surface: SurfaceDescriptor,
        width: u32,
        height: u32,
    ) -> RecorderResult<()> {
        *self.shared.surface.lock() = Some(surface);
        *self.shared.size.lock() = (width, height);

        let shared = self.shared.clone();
        self.executor.queue(move |ctx| {
            let mut slot = shared.slot.lock();
            if let Err(e) = slot.filter.init(ctx, width, height) {
                error!("filter init failed: {e}");
                return;
            }
            slot.output = slot.filter.output_texture();
            debug!(width, height, "render stage initialized");
        })?;
        Ok(())
    }

    /// Notify that a new camera frame is available.
    ///
    /// Queues at most one draw; frames arriving while a draw is pending
    /// replace the waiting texture and the older one is dropped.
    pub fn on_frame_available(&self, texture: TextureHandle) -> RecorderResult<()> {
        *self.shared.latest_frame.lock() = Some(texture);

        if self.shared.draw_pending.swap(true, Ordering::AcqRel) {
            let dropped = self.shared.dropped_frames.fetch_add(1, Ordering::Relaxed) + 1;
            trace!(dropped, "draw still pending, coalescing frame");
            return Ok(());
        }

        let shared = self.shared.clone();
        self.executor.queue(move |ctx| {
            // Clear the flag before drawing so a frame arriving mid-draw
            // queues the next draw instead of being lost.
            shared.draw_pending.store(false, Ordering::Release);
            let Some(input) = shared.latest_frame.lock().take() else {
                return;
            };

            let mut slot = shared.slot.lock();
            if let Err(e) = slot.filter.draw(ctx, input) {
                error!("filter draw failed: {e}");
                return;
            }
            slot.output = slot.filter.output_texture();
            drop(slot);

            if let Err(e) = ctx.swap_buffers() {
                error!("swap buffers failed: {e}");
            }
            if let Some(fps) = shared.fps.lock().tick() {
                debug!(fps, "render throughput");
            }
        })?;
        Ok(())
    }

    /// Queue a resize of the filter chain; no-op if the size is unchanged.
    pub fn update_size(&self, width: u32, height: u32) -> RecorderResult<()> {
        {
            let mut size = self.shared.size.lock();
            if *size == (width, height) {
                return Ok(());
            }
            *size = (width, height);
        }

        let shared = self.shared.clone();
        self.executor.queue(move |ctx| {
            let mut slot = shared.slot.lock();
            if let Err(e) = slot.filter.resize(ctx, width, height) {
                error!("filter resize failed: {e}");
                return;
            }
            slot.output = slot.filter.output_texture();
        })?;
        Ok(())
    }

    /// Queue replacement of the active filter.
    ///
    /// The old filter's resources are released strictly before the new
    /// filter is initialized, both on the executor thread.
    pub fn set_filter(&self, new_filter: Box<dyn Filter>) -> RecorderResult<()> {
        let shared = self.shared.clone();
        self.executor.queue(move |ctx| {
            let (width, height) = *shared.size.lock();
            let mut slot = shared.slot.lock();
            slot.filter.release(ctx);
            slot.filter = new_filter;
            if let Err(e) = slot.filter.init(ctx, width, height) {
                error!("replacement filter init failed: {e}");
                return;
            }
            slot.output = slot.filter.output_texture();
            debug!("filter replaced");
        })?;
        Ok(())
    }

    /// Handle of the current output texture.
    ///
    /// Callers queue their reads of the texture on the same executor, so
    /// the handle-producing draw and the handle-consuming task keep their
    /// happens-before order.
    pub fn frame_buffer_texture(&self) -> TextureHandle {
        self.shared.slot.lock().output
    }

    /// Frames dropped by latest-wins coalescing so far
    pub fn dropped_frames(&self) -> u64 {
        self.shared.dropped_frames.load(Ordering::Relaxed)
    }

    /// Queue teardown of the filter and surface binding.
    pub fn release(&self) -> RecorderResult<()> {
        let shared = self.shared.clone();
        self.executor.queue(move |ctx| {
            shared.slot.lock().filter.release(ctx);
            *shared.surface.lock() = None;
            debug!("render stage released");
        })?;
        Ok(())
    }
}
