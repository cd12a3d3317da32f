//! Filter collaborator interface
//!
//! A filter turns the camera texture into the recorder's output frame
//! buffer texture. The pixel algorithms are out of scope; the core only
//! depends on the init/draw/resize/release lifecycle, which always runs
//! on the GPU executor thread.

use crate::capture::traits::TextureHandle;
use crate::executor::GpuContext;
use crate::utils::error::RecorderResult;

/// GPU filter stage collaborator
///
/// All methods are invoked on the GPU executor thread with the context
/// current; implementations never need their own GPU-side locking.
pub trait Filter: Send {
    fn init(&mut self, ctx: &mut dyn GpuContext, width: u32, height: u32) -> RecorderResult<()>;

    fn resize(&mut self, ctx: &mut dyn GpuContext, width: u32, height: u32) -> RecorderResult<()>;

    /// Consume `input` and render the filtered result into the filter's
    /// own frame buffer.
    fn draw(&mut self, ctx: &mut dyn GpuContext, input: TextureHandle) -> RecorderResult<()>;

    /// Handle of the frame buffer texture the last `draw` rendered into
    fn output_texture(&self) -> TextureHandle;

    fn release(&mut self, ctx: &mut dyn GpuContext);
}

/// Identity filter used when the host does not install one
#[derive(Debug, Default)]
pub struct PassthroughFilter {
    output: TextureHandle,
}

impl Filter for PassthroughFilter {
    fn init(&mut self, _ctx: &mut dyn GpuContext, _width: u32, _height: u32) -> RecorderResult<()> {
        Ok(())
    }

    fn resize(
        &mut self,
        _ctx: &mut dyn GpuContext,
        _width: u32,
        _height: u32,
    ) -> RecorderResult<()> {
        Ok(())
    }

    fn draw(&mut self, _ctx: &mut dyn GpuContext, input: TextureHandle) -> RecorderResult<()> {
        self.output = input;
        Ok(())
    }

    fn output_texture(&self) -> TextureHandle {
        self.output
    }

    fn release(&mut self, _ctx: &mut dyn GpuContext) {}
}
