//! Error types for the location daemon.

use lbs_locator::LocatorError;

/// All errors that can occur in the daemon.
#[derive(thiserror::Error, Debug)]
pub enum DaemonError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Locator stopped")]
    LocatorStopped,

    #[error(transparent)]
    Locator(#[from] LocatorError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type DaemonResult<T> = Result<T, DaemonError>;
