//! JSON file credential store
//!
//! Keeps the candidate list and the active pointer in one JSON document:
//!
//! ```json
//! { "active": { "label": "...", "secret": "..." }, "candidates": [ ... ] }
//! ```
//!
//! All writes use atomic temp-file + rename. A tokio Mutex serializes writers
//! so a promotion and an operator edit never interleave on disk. The in-memory
//! copy only changes once the write has landed.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::{Credential, CredentialStore};

/// On-disk document layout.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    active: Option<Credential>,
    #[serde(default)]
    candidates: Vec<Credential>,
}

/// Credential store backed by a single JSON file.
pub struct FileCredentialStore {
    path: PathBuf,
    state: Mutex<StoreFile>,
}

impl FileCredentialStore {
    /// Load the store from `path`.
    ///
    /// A missing file is a cold start: an empty document is written so later
    /// loads take the normal path. The gateway then needs an explicit cookie.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            let parsed: StoreFile = serde_json::from_str(&contents)
                .map_err(|e| Error::Parse(format!("parsing credential file: {e}")))?;
            info!(
                path = %path.display(),
                candidates = parsed.candidates.len(),
                active = parsed.active.as_ref().map(|c| c.label.as_str()),
                "loaded credentials"
            );
            parsed
        } else {
            info!(path = %path.display(), "credential file not found, starting with empty store");
            let empty = StoreFile::default();
            write_atomic(&path, &empty).await?;
            empty
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }
}

impl CredentialStore for FileCredentialStore {
    fn list_candidates(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Credential>>> + Send + '_>> {
        Box::pin(async move { Ok(self.state.lock().await.candidates.clone()) })
    }

    fn get_active(&self) -> Pin<Box<dyn Future<Output = Result<Option<Credential>>> + Send + '_>> {
        Box::pin(async move { Ok(self.state.lock().await.active.clone()) })
    }

    fn set_active<'a>(
        &'a self,
        label: &'a str,
        secret: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let mut next = state.clone();
            next.active = Some(Credential::new(label, secret));
            write_atomic(&self.path, &next).await?;
            *state = next;
            info!(label, "active credential updated");
            Ok(())
        })
    }
}

/// Write the store document atomically with 0600 permissions (it holds cookies).
async fn write_atomic(path: &Path, data: &StoreFile) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Parse(format!("serializing credentials: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".credentials.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credentials");
    Ok(())
}
