//! Error types for failover and generation operations

/// Errors from guarded and unguarded studio operations.
///
/// There is deliberately no "no viable credential" variant: when every
/// candidate is short on credits the guard runs the operation on the current
/// account anyway and the caller sees whatever the studio answers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Studio(#[from] studio_client::Error),

    #[error("credential store error: {0}")]
    Store(#[from] credential_store::Error),

    #[error("no usable credential: {0}")]
    NoActiveCredential(String),
}

impl Error {
    /// Stable machine-readable kind for error envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Studio(e) => e.kind(),
            Error::Store(_) => "credential_store_error",
            Error::NoActiveCredential(_) => "no_active_credential",
        }
    }
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
