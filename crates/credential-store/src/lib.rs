//! Credential records and the store that supplies them
//!
//! A credential is an opaque cookie string plus a human-readable account
//! label. The store hands out the ordered list of candidates and remembers
//! which one is "active". Only the failover controller writes the active
//! pointer; everything else reads.
//!
//! `CredentialStore` uses `Pin<Box<dyn Future>>` return types so that callers
//! can hold an `Arc<dyn CredentialStore>` and swap backends freely.

pub mod error;
pub mod file;

pub use error::{Error, Result};
pub use file::FileCredentialStore;

use common::Secret;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// One account's credential. Identity is the secret value, not the label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    /// Human-readable account label, safe to log
    pub label: String,
    /// Cookie string sent to the identity provider
    pub secret: Secret<String>,
}

impl Credential {
    pub fn new(label: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            secret: Secret::new(secret.into()),
        }
    }

    /// Whether both credentials refer to the same account.
    pub fn same_account(&self, other: &Credential) -> bool {
        self.secret == other.secret
    }
}

/// Source of candidate credentials and keeper of the active pointer.
pub trait CredentialStore: Send + Sync {
    /// Candidate credentials in store order. Failover walks them first-fit.
    fn list_candidates(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Credential>>> + Send + '_>>;

    /// The credential last promoted to active, if any. May be stale.
    fn get_active(&self) -> Pin<Box<dyn Future<Output = Result<Option<Credential>>> + Send + '_>>;

    /// Persist `label`/`secret` as the active credential.
    fn set_active<'a>(
        &'a self,
        label: &'a str,
        secret: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_the_secret_not_the_label() {
        let a = Credential::new("main", "cookie-1");
        let renamed = Credential::new("renamed", "cookie-1");
        let other = Credential::new("main", "cookie-2");
        assert!(a.same_account(&renamed));
        assert!(!a.same_account(&other));
    }

    #[test]
    fn debug_never_prints_the_cookie() {
        let cred = Credential::new("main", "__client=very-secret-cookie");
        let debug = format!("{cred:?}");
        assert!(debug.contains("main"));
        assert!(!debug.contains("very-secret-cookie"), "got: {debug}");
    }
}
