//! Encoder adapters
//!
//! Trait contracts for the hardware/software encoder collaborators plus
//! the pool-driven cache encoder that bridges frame production to a
//! synchronous codec running on its own thread.

pub mod cache;
pub mod software;

use crate::utils::error::{RecorderError, RecorderResult};
use serde::{Deserialize, Serialize};

pub use cache::CacheEncoder;
pub use software::{PixelReader, SoftwareVideoEncoder};

/// Classification of one encoded output unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleKind {
    /// Codec configuration data (e.g. SPS/PPS); routed to
    /// `on_format_changed` rather than the sample stream.
    Config,
    /// Key frame
    Key,
    /// Regular frame
    Delta,
}

/// One unit of encoded output flowing from an encoder to the muxer
///
/// Ownership transfers to the muxer on delivery.
#[derive(Debug, Clone)]
pub struct FrameSample {
    pub kind: SampleKind,
    /// Presentation timestamp in microseconds
    pub pts_us: i64,
    pub data: Vec<u8>,
}

/// Negotiated output stream format, delivered once before samples flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamFormat {
    pub mime: String,
    pub width: u32,
    pub height: u32,
}

/// Receiver of encoded output; implemented by the muxer adapter
pub trait SampleSink: Send + Sync {
    fn on_format_changed(&self, format: StreamFormat);

    fn on_sample(&self, sample: FrameSample);
}

/// Asynchronous readiness/failure callbacks from an encoder adapter
pub trait EncoderEvents: Send + Sync {
    /// The encoder finished its asynchronous negotiation and can be
    /// started.
    fn on_encoder_ready(&self);

    fn on_encoder_error(&self, message: String);
}

/// Encoder collaborator lifecycle
///
/// Built by a host-supplied factory during session prepare; samples are
/// emitted to the registered [`SampleSink`].
pub trait EncoderAdapter: Send {
    fn start(&mut self) -> RecorderResult<()>;

    fn pause(&mut self) -> RecorderResult<()>;

    fn stop(&mut self) -> RecorderResult<()>;

    fn release(&mut self) -> RecorderResult<()>;

    /// A new filtered frame is available in the render stage's output
    /// texture. Adapters that pull frames themselves may ignore this.
    fn frame_available(&self) {}
}

/// Synchronous codec collaborator driven by [`CacheEncoder`]
///
/// `encode` consumes one raw frame and may emit zero or one compressed
/// sample; the codec assigns presentation timestamps itself.
pub trait FrameCodec: Send {
    fn encode(&mut self, frame: &[u8]) -> Result<Option<FrameSample>, RecorderError>;

    /// Current negotiated output format
    fn format(&self) -> StreamFormat;

    fn release(&mut self);
}
