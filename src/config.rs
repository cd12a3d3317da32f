//! Session configuration
//!
//! Holds the video parameters a recording session is built from and
//! resolves derived values (like the automatic bitrate) before any
//! encoder is constructed.

use crate::capture::traits::CameraIndex;
use crate::utils::error::{RecorderError, RecorderResult};
use serde::{Deserialize, Serialize};

/// Multiplier used when the bitrate is left at 0 (auto).
///
/// The resolved value is `width * height * AUTO_BITRATE_FACTOR * fps / 24`,
/// roughly four bits per pixel at 24fps scaled by the actual frame rate.
pub const AUTO_BITRATE_FACTOR: u64 = 4;

/// Which codec implementation the encoder factory should pick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecMode {
    /// Platform hardware codec
    Hardware,
    /// Software codec fed through the buffer pool
    Software,
}

/// Configuration for a recording session
///
/// All fields are only mutable while the session is idle; see the
/// session state machine for the legality rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Output width in pixels
    pub width: u32,

    /// Output height in pixels
    pub height: u32,

    /// Target frame rate
    pub fps: u32,

    /// Video bitrate in bits per second; 0 means auto
    pub bitrate: u32,

    /// Hardware or software encoding
    pub codec_mode: CodecMode,

    /// Which camera to open
    pub camera: CameraIndex,

    /// File path or stream URI for the muxer output
    pub output_uri: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
            bitrate: 0,
            codec_mode: CodecMode::Hardware,
            camera: CameraIndex::Back,
            output_uri: None,
        }
    }
}

impl SessionConfig {
    /// Validate the configuration before `prepare`
    pub fn validate(&self) -> RecorderResult<()> {
        match &self.output_uri {
            None => {
                return Err(RecorderError::InvalidConfig(
                    "output uri is not set".into(),
                ));
            }
            Some(uri) if uri.is_empty() => {
                return Err(RecorderError::InvalidConfig(
                    "output uri is empty".into(),
                ));
            }
            Some(_) => {}
        }
        if self.width == 0 || self.height == 0 {
            return Err(RecorderError::InvalidConfig(format!(
                "output size must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        if self.fps == 0 {
            return Err(RecorderError::InvalidConfig("fps must be positive".into()));
        }
        Ok(())
    }

    /// Resolve the effective bitrate, replacing 0 (auto) with a
    /// deterministic function of the frame geometry and rate.
    pub fn resolved_bitrate(&self) -> u32 {
        if self.bitrate > 0 {
            return self.bitrate;
        }
        let auto = self.width as u64 * self.height as u64 * AUTO_BITRATE_FACTOR
            * self.fps as u64
            / 24;
        auto.min(u32::MAX as u64) as u32
    }
}

/// Fully resolved parameters handed to an encoder factory
///
/// Unlike [`SessionConfig`], the bitrate here is never 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncoderConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate: u32,
    pub codec_mode: CodecMode,
}

impl From<&SessionConfig> for EncoderConfig {
    fn from(config: &SessionConfig) -> Self {
        EncoderConfig {
            width: config.width,
            height: config.height,
            fps: config.fps,
            bitrate: config.resolved_bitrate(),
            codec_mode: config.codec_mode,
        }
    }
}
