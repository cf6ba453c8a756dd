//! Durable object storage surface.
//!
//! The pipeline only needs `put(key, bytes)` with confirmed writes; the
//! backing service is interchangeable.

pub mod s3;

use async_trait::async_trait;

use crate::error::ArchiveError;

pub use s3::S3Store;

/// Durable key/value byte storage with confirmed writes.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Durably persist `bytes` under `key`, overwriting any existing
    /// object. Returns only after the write is confirmed.
    ///
    /// # Errors
    ///
    /// Returns `Transient` for failures worth retrying.
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), ArchiveError>;
}
