//! Batch serialization and durable hand-off.
//!
//! A batch is serialized to a JSON envelope and written under a key derived
//! deterministically from `{channel_id, batch_seq}`, so re-sending the same
//! batch after a crash overwrites the same object (at-least-once delivery,
//! idempotent at the storage layer). Cursor mutation is strictly the
//! caller's business, after a confirmed flush.

use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::ArchiveError;
use crate::model::{Batch, MessageItem};
use crate::storage::ObjectStore;
use crate::worker::BackoffPolicy;

/// The stored representation of a batch.
#[derive(Debug, Serialize)]
struct BatchEnvelope<'a> {
    channel_id: &'a str,
    batch_seq: u64,
    created_at: chrono::DateTime<chrono::Utc>,
    item_count: usize,
    /// SHA-256 over the serialized items, for post-hoc integrity checks.
    items_sha256: String,
    items: &'a [MessageItem],
}

/// Serializes batches and hands them to the object store with retry.
pub struct UploadPipeline {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    backoff: BackoffPolicy,
}

impl UploadPipeline {
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, prefix: &str, backoff: BackoffPolicy) -> Self {
        Self {
            store,
            prefix: prefix.to_string(),
            backoff,
        }
    }

    /// The idempotency key for a batch.
    #[must_use]
    pub fn batch_key(prefix: &str, channel_id: &str, batch_seq: u64) -> String {
        format!("{prefix}{channel_id}/batch-{batch_seq:08}.json")
    }

    /// Serialize and durably store a batch, retrying transient failures with
    /// backoff. Returns `Ok` only on a confirmed write.
    ///
    /// # Errors
    ///
    /// Returns `RetriesExhausted` once the retry budget is spent. The caller
    /// must retain the batch and not advance any cursor.
    pub async fn flush(&self, batch: &Batch) -> Result<(), ArchiveError> {
        let key = Self::batch_key(&self.prefix, batch.channel_id(), batch.batch_seq());
        let bytes = serialize_batch(batch)?;

        let mut attempts = 0u32;
        loop {
            match self.store.put(&key, &bytes, "application/json").await {
                Ok(()) => {
                    debug!(
                        key = %key,
                        items = batch.len(),
                        size = bytes.len(),
                        "Batch flushed"
                    );
                    return Ok(());
                }
                Err(ArchiveError::Transient(msg)) => {
                    attempts += 1;
                    if !self.backoff.should_retry(attempts) {
                        return Err(ArchiveError::RetriesExhausted {
                            attempts,
                            last_error: msg,
                        });
                    }
                    let delay = self.backoff.delay(attempts);
                    warn!(
                        key = %key,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Batch flush failed, retrying: {msg}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(other) => return Err(other),
            }
        }
    }
}

fn serialize_batch(batch: &Batch) -> Result<Vec<u8>, ArchiveError> {
    let items_json = serde_json::to_vec(batch.items())
        .map_err(|e| ArchiveError::Transient(format!("serialize items: {e}")))?;

    let mut hasher = Sha256::new();
    hasher.update(&items_json);
    let items_sha256 = hex::encode(hasher.finalize());

    let envelope = BatchEnvelope {
        channel_id: batch.channel_id(),
        batch_seq: batch.batch_seq(),
        created_at: batch.created_at(),
        item_count: batch.len(),
        items_sha256,
        items: batch.items(),
    };

    serde_json::to_vec(&envelope)
        .map_err(|e| ArchiveError::Transient(format!("serialize batch: {e}")))
}
