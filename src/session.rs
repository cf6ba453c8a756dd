//! Persisted authenticated-session state.
//!
//! The session blob is opaque to this module: it is whatever the automation
//! capability needs to restore an authenticated browsing context (in
//! practice, the browser cookie set). The blob is read once at worker
//! startup and rewritten after any fresh login.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// An authenticated browsing session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Opaque automation state (cookie set or equivalent).
    pub blob: serde_json::Value,
    /// Cleared when automation detects the session is logged out.
    pub valid: bool,
    pub saved_at: DateTime<Utc>,
}

impl Session {
    #[must_use]
    pub fn new(blob: serde_json::Value) -> Self {
        Self {
            blob,
            valid: true,
            saved_at: Utc::now(),
        }
    }
}

/// Durable store for the session blob.
///
/// Saves are atomic (write-to-temp-then-rename) so a crash mid-write cannot
/// leave a torn file. A missing or unparseable file loads as `None`:
/// corruption means "no session", never a startup failure.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    #[must_use]
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join("session.json"),
        }
    }

    /// Load the persisted session, if any.
    ///
    /// # Errors
    ///
    /// Returns an error only for I/O failures other than a missing file.
    pub async fn load(&self) -> Result<Option<Session>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read session file: {}", self.path.display())
                })
            }
        };

        match serde_json::from_slice::<Session>(&bytes) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    "Session file unparseable, treating as no session: {e}"
                );
                Ok(None)
            }
        }
    }

    /// Atomically persist the session.
    ///
    /// # Errors
    ///
    /// Returns an error if the write or rename fails.
    pub async fn save(&self, session: &Session) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(session).context("Failed to serialize session")?;
        write_atomic(&self.path, &bytes).await?;
        debug!(path = %self.path.display(), valid = session.valid, "Session persisted");
        Ok(())
    }

    /// Remove the persisted session blob, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal fails for reasons other than a
    /// missing file.
    pub async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| {
                format!("Failed to remove session file: {}", self.path.display())
            }),
        }
    }
}

/// Write bytes to `path` via a temp file in the same directory plus rename.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, bytes)
        .await
        .with_context(|| format!("Failed to write temp file: {}", tmp_path.display()))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("Failed to rename temp file into place: {}", path.display()))?;
    Ok(())
}
