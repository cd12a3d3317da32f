//! Shared utilities
//!
//! Common helpers used across the recorder.

pub mod error;

pub use error::{ErrorReport, RecorderError, RecorderResult};
