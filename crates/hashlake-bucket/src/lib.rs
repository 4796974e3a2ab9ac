//! Abstractions over S3-compatible storage backends used for staged dataset artifacts.
//!
//! The data-lake bucket is addressed by name plus object key; credentials and
//! endpoint are resolved from the environment under a named handle (the
//! `gcs_bucket_block_name` configuration key), so the same client works against
//! AWS S3, MinIO, or a GCS interoperability endpoint.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct ObjectStoreConfig {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub force_path_style: bool,
}

impl ObjectStoreConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            force_path_style: false,
        }
    }

    /// Resolves connection details from the environment under a named handle.
    ///
    /// A handle of `lake-block` reads `LAKE_BLOCK_ENDPOINT`, `LAKE_BLOCK_REGION`,
    /// `LAKE_BLOCK_ACCESS_KEY_ID` and `LAKE_BLOCK_SECRET_ACCESS_KEY`. Only the
    /// bucket name itself is passed in; everything else is optional and falls
    /// back to the SDK's default provider chain.
    pub fn from_handle(bucket: impl Into<String>, handle: &str) -> Result<Self, BucketError> {
        let bucket = bucket.into();
        if bucket.is_empty() {
            return Err(BucketError::Configuration(
                "bucket name cannot be empty".into(),
            ));
        }
        if handle.is_empty() {
            return Err(BucketError::Configuration(
                "bucket credential handle cannot be empty".into(),
            ));
        }

        let prefix = env_prefix(handle);
        let mut config = Self::new(bucket);
        if let Ok(region) = std::env::var(format!("{prefix}_REGION")) {
            config.region = region;
        }
        config.endpoint = std::env::var(format!("{prefix}_ENDPOINT")).ok();
        config.access_key_id = std::env::var(format!("{prefix}_ACCESS_KEY_ID")).ok();
        config.secret_access_key = std::env::var(format!("{prefix}_SECRET_ACCESS_KEY")).ok();
        // Non-AWS endpoints (MinIO, GCS interop) generally require path-style addressing.
        config.force_path_style = config.endpoint.is_some();
        Ok(config)
    }
}

fn env_prefix(handle: &str) -> String {
    handle
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[derive(Debug, Error)]
pub enum BucketError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("sdk error: {0}")]
    Sdk(String),
    #[error("object not found: {0}")]
    NotFound(String),
}

impl BucketError {
    fn from_sdk(err: impl fmt::Display) -> Self {
        Self::Sdk(err.to_string())
    }
}

#[async_trait]
pub trait BucketStore: Send + Sync {
    async fn put_object(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<(), BucketError>;
    async fn get_object(&self, key: &str) -> Result<Bytes, BucketError>;
    async fn delete_object(&self, key: &str) -> Result<(), BucketError>;
}

#[derive(Clone)]
pub struct S3BucketStore {
    client: Client,
    bucket: String,
}

impl S3BucketStore {
    pub async fn new(config: ObjectStoreConfig) -> Result<Self, BucketError> {
        if config.bucket.is_empty() {
            return Err(BucketError::Configuration(
                "bucket name cannot be empty".into(),
            ));
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            let credentials = Credentials::new(access_key, secret_key, None, None, "static");
            loader = loader.credentials_provider(SharedCredentialsProvider::new(credentials));
        }

        let shared_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared_config);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        let client = Client::from_conf(builder.build());
        Ok(Self {
            client,
            bucket: config.bucket,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl BucketStore for S3BucketStore {
    async fn put_object(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<(), BucketError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes.to_vec()))
            .content_type(content_type)
            .send()
            .await
            .map_err(BucketError::from_sdk)?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Bytes, BucketError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| match err {
                SdkError::ServiceError(service_err) => {
                    let message = service_err.err().to_string();
                    if message.contains("NoSuchKey") {
                        BucketError::NotFound(key.to_string())
                    } else {
                        BucketError::from_sdk(message)
                    }
                }
                other => BucketError::from_sdk(other),
            })?;

        let data = output.body.collect().await.map_err(BucketError::from_sdk)?;
        Ok(Bytes::from(data.into_bytes()))
    }

    async fn delete_object(&self, key: &str) -> Result<(), BucketError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(BucketError::from_sdk)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_normalizes_to_env_prefix() {
        assert_eq!(env_prefix("lake-block"), "LAKE_BLOCK");
        assert_eq!(env_prefix("my.bucket.handle"), "MY_BUCKET_HANDLE");
        assert_eq!(env_prefix("PLAIN"), "PLAIN");
    }

    #[test]
    fn from_handle_rejects_empty_bucket() {
        let result = ObjectStoreConfig::from_handle("", "lake-block");
        assert!(matches!(result, Err(BucketError::Configuration(_))));
    }

    #[test]
    fn from_handle_rejects_empty_handle() {
        let result = ObjectStoreConfig::from_handle("datalake", "");
        assert!(matches!(result, Err(BucketError::Configuration(_))));
    }

    #[test]
    fn from_handle_resolves_env_overrides() {
        std::env::set_var("HB_TEST_BLOCK_ENDPOINT", "http://localhost:9000");
        std::env::set_var("HB_TEST_BLOCK_REGION", "eu-west-1");

        let config = ObjectStoreConfig::from_handle("datalake", "hb-test-block")
            .expect("handle should resolve");
        assert_eq!(config.bucket, "datalake");
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.endpoint.as_deref(), Some("http://localhost:9000"));
        assert!(config.force_path_style);

        std::env::remove_var("HB_TEST_BLOCK_ENDPOINT");
        std::env::remove_var("HB_TEST_BLOCK_REGION");
    }
}
