//! Error types for the reconciliation engine.

use thiserror::Error;

/// Errors raised by message handlers and configuration loading.
///
/// Handler errors never escape the Dispatcher: they are logged and the
/// offending message is discarded.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Malformed body: {0}")]
    MalformedBody(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for TrackerError {
    fn from(e: serde_json::Error) -> Self {
        Self::MalformedBody(e.to_string())
    }
}
