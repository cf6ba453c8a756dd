use async_trait::async_trait;
use s3::creds::Credentials;
use s3::region::Region;
use s3::Bucket;
use tracing::debug;

use crate::config::Config;
use crate::error::ArchiveError;
use crate::storage::ObjectStore;

/// S3-backed object store.
#[derive(Clone)]
pub struct S3Store {
    bucket: Box<Bucket>,
}

impl S3Store {
    /// Create a new S3 store from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if credentials are missing or client initialization
    /// fails.
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        use anyhow::Context;

        let access_key = std::env::var("AWS_ACCESS_KEY_ID").context("AWS_ACCESS_KEY_ID not set")?;
        let secret_key =
            std::env::var("AWS_SECRET_ACCESS_KEY").context("AWS_SECRET_ACCESS_KEY not set")?;

        let credentials = Credentials::new(Some(&access_key), Some(&secret_key), None, None, None)
            .context("Failed to create S3 credentials")?;

        let region = if let Some(ref endpoint) = config.s3_endpoint {
            Region::Custom {
                region: config.s3_region.clone(),
                endpoint: endpoint.clone(),
            }
        } else {
            config.s3_region.parse().unwrap_or(Region::UsEast1)
        };

        let bucket = Bucket::new(&config.s3_bucket, region, credentials)
            .context("Failed to create S3 bucket")?;

        // Use path-style for custom endpoints (MinIO, R2, etc.)
        let bucket = if config.s3_endpoint.is_some() {
            bucket.with_path_style()
        } else {
            bucket
        };

        Ok(Self { bucket })
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), ArchiveError> {
        debug!(key = %key, content_type = %content_type, size = bytes.len(), "Uploading object to S3");

        self.bucket
            .put_object_with_content_type(key, bytes, content_type)
            .await
            .map_err(|e| ArchiveError::Transient(format!("S3 put failed for {key}: {e}")))?;

        Ok(())
    }
}
