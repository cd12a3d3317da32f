//! Capture trait definitions
//!
//! Platform-agnostic traits and handle types for the capture device and
//! the GPU surface it renders into.

use crate::utils::error::RecorderResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Opaque handle to a GPU texture
///
/// Produced by the capture device (camera frames) and by filters (output
/// frame buffers). Only meaningful to the collaborator that issued it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextureHandle(pub u32);

/// Descriptor for a renderable output surface bound to a native display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurfaceDescriptor {
    /// Native window/display handle, opaque to the core
    pub native_handle: u64,

    pub width: u32,

    pub height: u32,
}

/// Which camera on the device to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraIndex {
    Back,
    Front,
}

/// Parameters handed to [`CaptureDevice::open`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConfig {
    pub camera: CameraIndex,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Callbacks a capture device delivers to the session
///
/// `on_device_ready` fires once the device finished its asynchronous
/// open; `on_frame` fires on the device's own callback thread at sensor
/// rate.
pub trait DeviceEvents: Send + Sync {
    fn on_device_ready(&self);

    fn on_frame(&self, texture: TextureHandle);

    fn on_device_error(&self, message: String);
}

/// Camera hardware collaborator
pub trait CaptureDevice: Send {
    /// Begin asynchronous acquisition; readiness is signalled through
    /// `events`, not through the return value.
    fn open(&mut self, config: &CaptureConfig, events: Arc<dyn DeviceEvents>)
        -> RecorderResult<()>;

    /// Switch the live camera; legal while the device is open.
    fn switch_camera(&mut self, index: CameraIndex) -> RecorderResult<()>;

    fn release(&mut self) -> RecorderResult<()>;
}
