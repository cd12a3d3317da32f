//! Capture collaborator interfaces
//!
//! The camera hardware lives behind these traits; the recorder core only
//! depends on the open/ready/frame/switch/release contract.

pub mod traits;

pub use traits::{
    CameraIndex, CaptureConfig, CaptureDevice, DeviceEvents, SurfaceDescriptor, TextureHandle,
};
