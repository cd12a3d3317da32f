//! camrec - live camera recording pipeline.
//!
//! Capture frames from a camera device, run them through a GPU filter
//! stage, encode, and mux into a container, coordinated by a session
//! state machine. Platform specifics (the actual camera, GL context,
//! codec and container writer) are supplied by the host through the
//! collaborator traits; this crate owns the threading, buffering and
//! lifecycle logic between them.

pub mod capture;
pub mod config;
pub mod encode;
pub mod executor;
pub mod mux;
pub mod pool;
pub mod render;
pub mod session;
pub mod utils;

pub use capture::traits::{
    CameraIndex, CaptureConfig, CaptureDevice, DeviceEvents, SurfaceDescriptor, TextureHandle,
};
pub use config::{CodecMode, EncoderConfig, SessionConfig};
pub use encode::{
    EncoderAdapter, EncoderEvents, FrameCodec, FrameSample, SampleKind, SampleSink, StreamFormat,
};
pub use executor::{ExecutorError, GpuContext, GpuExecutor};
pub use mux::{MuxerAdapter, MuxerEvents};
pub use pool::{BufferPool, PoolError};
pub use render::filter::{Filter, PassthroughFilter};
pub use render::RenderStage;
pub use session::state::SessionState;
pub use session::{PipelineFactory, Session, SessionEvent};
pub use utils::error::{ErrorReport, RecorderError, RecorderResult};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing for binaries and examples embedding the pipeline.
///
/// Reads `RUST_LOG` when set, defaulting to debug output for this crate.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "camrec=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
