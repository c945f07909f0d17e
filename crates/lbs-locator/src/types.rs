//! Core data types shared by the scheduler, the request lifecycle, and callers.

use serde::{Deserialize, Serialize};

/// A position estimate returned by the lookup service.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    /// Accuracy radius in meters, or [`Position::UNKNOWN_ACCURACY`].
    pub accuracy: f64,
}

impl Position {
    /// Sentinel used when the service does not report a precision.
    pub const UNKNOWN_ACCURACY: f64 = -1.0;

    pub fn has_accuracy(&self) -> bool {
        self.accuracy >= 0.0
    }
}

/// Coarse classification of a failed lookup, as reported to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    KeyRejected,
    Protocol,
    Transport,
    TimedOut,
    Storage,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::KeyRejected => "key_rejected",
            Self::Protocol => "protocol",
            Self::Transport => "transport",
            Self::TimedOut => "timed_out",
            Self::Storage => "storage",
        }
    }
}

/// Errors that can occur while locating.
#[derive(thiserror::Error, Debug)]
pub enum LocatorError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Lookup key rejected at {since}, cooling down")]
    KeyRejected { since: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out")]
    TimedOut,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LocatorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LocatorError::Configuration(_) => ErrorKind::Configuration,
            LocatorError::KeyRejected { .. } => ErrorKind::KeyRejected,
            LocatorError::Protocol(_) | LocatorError::Json(_) => ErrorKind::Protocol,
            LocatorError::Transport(_) => ErrorKind::Transport,
            LocatorError::TimedOut => ErrorKind::TimedOut,
            LocatorError::Storage(_) | LocatorError::Io(_) => ErrorKind::Storage,
        }
    }
}

/// Convenience result type.
pub type LocatorResult<T> = Result<T, LocatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            LocatorError::Configuration("no key".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(LocatorError::TimedOut.kind(), ErrorKind::TimedOut);
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(LocatorError::from(json_err).kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_unknown_accuracy() {
        let pos = Position {
            latitude: 1.0,
            longitude: 2.0,
            accuracy: Position::UNKNOWN_ACCURACY,
        };
        assert!(!pos.has_accuracy());
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let s = serde_json::to_string(&ErrorKind::KeyRejected).unwrap();
        assert_eq!(s, "\"key_rejected\"");
        assert_eq!(ErrorKind::TimedOut.as_str(), "timed_out");
    }
}
