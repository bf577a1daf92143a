//! Error types for studio session and upstream operations

/// Errors from the session lifecycle and studio calls.
///
/// The first three variants mean the credential could not produce a usable
/// session; the failover controller skips such candidates.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("version lookup failed: {0}")]
    VersionLookup(String),

    #[error("session establish failed: {0}")]
    SessionEstablish(String),

    #[error("session initialization failed: {0}")]
    AuthInit(String),

    #[error("token renewal failed: {0}")]
    TokenRenew(String),

    #[error("quota query failed: {0}")]
    QuotaQuery(String),

    #[error("upstream request failed: {0}")]
    Upstream(String),

    /// Caller-supplied input rejected before any request was made.
    #[error("invalid request: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Whether this error came out of `Session::initialize`, i.e. the
    /// credential is unusable rather than the call being unlucky.
    pub fn rejects_credential(&self) -> bool {
        matches!(
            self,
            Error::VersionLookup(_) | Error::SessionEstablish(_) | Error::AuthInit(_)
        )
    }

    /// Stable machine-readable kind for error envelopes and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::VersionLookup(_) => "version_lookup_error",
            Error::SessionEstablish(_) => "session_establish_error",
            Error::AuthInit(_) => "auth_init_error",
            Error::TokenRenew(_) => "token_renew_error",
            Error::QuotaQuery(_) => "quota_query_error",
            Error::Upstream(_) => "upstream_request_error",
            Error::InvalidInput(_) => "invalid_request_error",
        }
    }
}

/// Result alias for studio operations.
pub type Result<T> = std::result::Result<T, Error>;
