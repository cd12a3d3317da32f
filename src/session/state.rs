//! Session lifecycle states

use serde::{Deserialize, Serialize};

/// Intermediate step inside [`SessionState::Preparing`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrepareStage {
    /// Capture device opening, waiting for its ready signal
    AwaitingDevice,
    /// Device ready, encoder building, waiting for its ready signal
    AwaitingEncoder,
}

/// Current state of a recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Nothing allocated, configuration may be changed freely
    Idle,
    /// Pipeline assembly in flight
    Preparing(PrepareStage),
    /// Pipeline assembled, frames flowing to preview but not recorded
    Prepared,
    /// Samples flowing to the muxer
    Started,
    /// All resources dropped, the session accepts no further calls
    Released,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Idle
    }
}

impl SessionState {
    /// Short label for logs and state mismatch errors
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Preparing(PrepareStage::AwaitingDevice) => "preparing(awaiting_device)",
            Self::Preparing(PrepareStage::AwaitingEncoder) => "preparing(awaiting_encoder)",
            Self::Prepared => "prepared",
            Self::Started => "started",
            Self::Released => "released",
        }
    }

    /// True once the pipeline has been assembled (prepared or beyond,
    /// but not released)
    pub fn is_prepared(&self) -> bool {
        matches!(self, Self::Prepared | Self::Started)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_idle() {
        assert_eq!(SessionState::default(), SessionState::Idle);
    }

    #[test]
    fn test_prepared_flag() {
        assert!(!SessionState::Idle.is_prepared());
        assert!(!SessionState::Preparing(PrepareStage::AwaitingDevice).is_prepared());
        assert!(SessionState::Prepared.is_prepared());
        assert!(SessionState::Started.is_prepared());
        assert!(!SessionState::Released.is_prepared());
    }

    #[test]
    fn test_serializes_lowercase() {
        let json = serde_json::to_string(&SessionState::Started).unwrap();
        assert_eq!(json, "\"started\"");
    }
}
