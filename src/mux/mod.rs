//! Muxer collaborator surface
//!
//! The muxer receives the encoder's output stream through the
//! [`SampleSink`](crate::encode::SampleSink) trait and writes the
//! container. Track setup is driven by the format-changed callback, so
//! a muxer must tolerate samples arriving before it has started and
//! either buffer or drop them.

use crate::encode::SampleSink;
use crate::utils::error::RecorderResult;

/// Observer for muxer lifecycle transitions
pub trait MuxerEvents: Send + Sync {
    /// The container is open and at least one track is configured.
    fn on_muxer_start(&self);
    /// The container failed. `code` is backend specific.
    fn on_muxer_error(&self, code: i32, message: String);
}

/// Container writer contract
///
/// All methods take `&self` so a muxer can be shared behind an `Arc`
/// with the encode thread feeding it through `SampleSink`.
pub trait MuxerAdapter: SampleSink {
    /// Open the container at the configured output location.
    fn on_start(&self) -> RecorderResult<()>;

    /// Finalize and close the container. Safe to call when the muxer
    /// never started.
    fn reset(&self) -> RecorderResult<()>;

    /// Drop backing resources. The muxer accepts no samples afterwards.
    fn release(&self) -> RecorderResult<()>;
}
