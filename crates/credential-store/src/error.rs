//! Error types for credential store operations

/// Errors from credential store backends.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("credential parse error: {0}")]
    Parse(String),

    #[error("credential store backend error: {0}")]
    Backend(String),
}

/// Result alias for credential store operations.
pub type Result<T> = std::result::Result<T, Error>;
