//! S3 implementation of [`ObjectStorage`]

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use k8s_openapi::api::core::v1::Secret;

use super::{ObjectStorage, StorageError};
use crate::crd::S3Storage;

const DEFAULT_REGION: &str = "us-east-1";

pub struct S3ObjectStorage {
    client: S3Client,
}

impl S3ObjectStorage {
    pub fn new(client: S3Client) -> Self {
        Self { client }
    }

    /// Build a client from the profile's credentials secret
    pub async fn from_secret(storage: &S3Storage, secret: &Secret) -> Result<Self, StorageError> {
        let access_key = secret_value(secret, "accessKeyId")?;
        let secret_key = secret_value(secret, "secretAccessKey")?;
        let region = secret_value(secret, "region").unwrap_or_else(|_| DEFAULT_REGION.to_string());

        let creds = aws_sdk_s3::config::Credentials::new(
            access_key,
            secret_key,
            None,
            None,
            "mysql-operator",
        );
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(region))
            .credentials_provider(creds)
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &storage.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self::new(S3Client::from_conf(builder.build())))
    }
}

fn secret_value(secret: &Secret, key: &str) -> Result<String, StorageError> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|v| String::from_utf8_lossy(&v.0).trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| StorageError::Config(format!("secret is missing key {}", key)))
}

#[async_trait]
impl ObjectStorage for S3ObjectStorage {
    async fn list_prefix(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| StorageError::Request(e.to_string()))?;
            keys.extend(page.contents().iter().filter_map(|o| o.key().map(String::from)));
        }
        Ok(keys)
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<(), StorageError> {
        if keys.is_empty() {
            return Ok(());
        }
        let objects = keys
            .iter()
            .map(|k| ObjectIdentifier::builder().key(k).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Request(e.to_string()))?;
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .map_err(|e| StorageError::Request(e.to_string()))?;

        self.client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| StorageError::Request(e.to_string()))?;
        Ok(())
    }
}
