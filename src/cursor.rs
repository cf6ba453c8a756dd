//! Per-channel archive cursors.
//!
//! Each channel has a watermark recording the last item id covered by a
//! confirmed upload, plus the next batch sequence number. The table is
//! owned exclusively by the worker and persisted immediately after every
//! confirmed flush, so a crash can only ever cause re-delivery, never loss.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::model::ItemId;
use crate::session::write_atomic;

/// Watermark for one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelCursor {
    /// Highest item id covered by a confirmed upload. `None` until the
    /// first confirmed batch.
    pub last_item_id: Option<ItemId>,
    /// Sequence number for the channel's *next* batch. Advances together
    /// with `last_item_id`, so a crash between flush and persist replays
    /// the same items under the same idempotency key.
    pub batch_seq: u64,
    pub updated_at: DateTime<Utc>,
}

impl Default for ChannelCursor {
    fn default() -> Self {
        Self {
            last_item_id: None,
            batch_seq: 0,
            updated_at: Utc::now(),
        }
    }
}

/// Durable table of per-channel cursors, keyed by channel id.
#[derive(Debug)]
pub struct CursorTable {
    path: PathBuf,
    cursors: BTreeMap<String, ChannelCursor>,
}

impl CursorTable {
    /// Load the cursor table from `data_dir`, starting empty if the file is
    /// missing or unparseable.
    ///
    /// # Errors
    ///
    /// Returns an error only for I/O failures other than a missing file.
    pub async fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join("cursors.json");
        let cursors = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(cursors) => cursors,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        "Cursor file unparseable, starting with empty table: {e}"
                    );
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read cursor file: {}", path.display()))
            }
        };

        Ok(Self { path, cursors })
    }

    /// The cursor for a channel, defaulting to an empty watermark.
    #[must_use]
    pub fn get(&self, channel_id: &str) -> ChannelCursor {
        self.cursors.get(channel_id).cloned().unwrap_or_default()
    }

    /// Advance a channel's watermark after a confirmed upload and persist
    /// the table. The watermark never moves backwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the new watermark would regress, or if
    /// persistence fails.
    pub async fn advance(&mut self, channel_id: &str, last_item_id: ItemId) -> Result<()> {
        let entry = self.cursors.entry(channel_id.to_string()).or_default();
        if let Some(current) = entry.last_item_id {
            if last_item_id < current {
                anyhow::bail!(
                    "cursor regression for channel {channel_id}: {last_item_id} < {current}"
                );
            }
        }
        entry.last_item_id = Some(last_item_id);
        entry.batch_seq += 1;
        entry.updated_at = Utc::now();

        self.persist().await?;
        debug!(
            channel_id,
            last_item_id,
            batch_seq = self.cursors[channel_id].batch_seq,
            "Cursor advanced"
        );
        Ok(())
    }

    /// Snapshot of per-channel progress for the control plane.
    #[must_use]
    pub fn progress(&self) -> BTreeMap<String, Option<ItemId>> {
        self.cursors
            .iter()
            .map(|(id, cursor)| (id.clone(), cursor.last_item_id))
            .collect()
    }

    async fn persist(&self) -> Result<()> {
        let bytes =
            serde_json::to_vec_pretty(&self.cursors).context("Failed to serialize cursors")?;
        write_atomic(&self.path, &bytes).await
    }
}
