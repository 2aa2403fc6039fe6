//! Error types for pixel-store operations

use thiserror::Error;

/// Main error type for pixel-store requests.
///
/// Protocol errors (missing/malformed parameters, out-of-range coordinates,
/// illegal type combinations) are distinguished from not-found and engine
/// failures so the dispatcher can attach the right subject to the error
/// record. Cleanup failures never surface here once a response has been
/// committed; they are logged instead.
#[derive(Error, Debug)]
pub enum PixError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} parameter missing")]
    MissingParameter(String),

    #[error("{0}")]
    Malformed(String),

    #[error("{0}")]
    OutOfRange(String),

    #[error("Method doesn't exist")]
    UnknownMethod,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Engine(String),

    #[error("Cleanup failed: {0}")]
    Cleanup(String),
}

/// Specialized Result type for pixel-store operations
pub type Result<T> = std::result::Result<T, PixError>;

impl From<serde_json::Error> for PixError {
    fn from(err: serde_json::Error) -> Self {
        PixError::Engine(err.to_string())
    }
}

impl PixError {
    /// Shorthand for a missing-parameter error.
    pub fn missing(name: &str) -> Self {
        PixError::MissingParameter(name.to_string())
    }
}
