//! Object storage access for backup data removal
//!
//! Bucket backed backups are removed through [`ObjectStorage`]; volume and
//! blob container backups are removed by a purge Job (see
//! `resources::backup_job`).

pub mod s3;

pub use s3::S3ObjectStorage;

use async_trait::async_trait;
use thiserror::Error;

/// Keys per DeleteObjects request
pub const DELETE_BATCH_SIZE: usize = 1000;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage configuration error: {0}")]
    Config(String),

    #[error("storage request failed: {0}")]
    Request(String),
}

impl StorageError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Request(_))
    }
}

/// List and delete objects under a prefix
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Keys of every object below `prefix`
    async fn list_prefix(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Delete a batch of keys
    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<(), StorageError>;

    /// Delete every object below `prefix`, returning the number removed
    async fn delete_prefix(&self, bucket: &str, prefix: &str) -> Result<usize, StorageError> {
        let keys = self.list_prefix(bucket, prefix).await?;
        for chunk in keys.chunks(DELETE_BATCH_SIZE) {
            self.delete_objects(bucket, chunk).await?;
        }
        Ok(keys.len())
    }
}

/// Normalise a backup directory into an object prefix ending in `/`
pub fn object_prefix(prefix: Option<&str>, output: &str) -> String {
    let base = prefix.unwrap_or_default().trim_matches('/');
    let output = output.trim_matches('/');
    if base.is_empty() {
        format!("{}/", output)
    } else {
        format!("{}/{}/", base, output)
    }
}
