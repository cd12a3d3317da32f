//! Error types and handling
//!
//! Common error types used across the recording pipeline.

use crate::executor::ExecutorError;
use crate::pool::PoolError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Recorder-wide error type
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("illegal state: cannot {operation} while {state}")]
    IllegalState {
        operation: &'static str,
        state: String,
    },

    #[error("capture device error: {0}")]
    Device(String),

    #[error("encoder error: {0}")]
    Encoder(String),

    #[error("muxer error: {0}")]
    Muxer(String),

    #[error("buffer pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("gpu executor error: {0}")]
    Executor(#[from] ExecutorError),
}

impl RecorderError {
    /// Stable machine-readable code for this error
    pub fn code(&self) -> &'static str {
        match self {
            RecorderError::InvalidConfig(_) => "INVALID_CONFIG",
            RecorderError::IllegalState { .. } => "ILLEGAL_STATE",
            RecorderError::Device(_) => "DEVICE_ERROR",
            RecorderError::Encoder(_) => "ENCODER_ERROR",
            RecorderError::Muxer(_) => "MUXER_ERROR",
            RecorderError::Pool(_) => "POOL_ERROR",
            RecorderError::Executor(_) => "EXECUTOR_ERROR",
        }
    }
}

/// Error payload delivered to session listeners
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub code: String,
    pub message: String,
}

impl From<&RecorderError> for ErrorReport {
    fn from(error: &RecorderError) -> Self {
        ErrorReport {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using RecorderError
pub type RecorderResult<T> = Result<T, RecorderError>;
