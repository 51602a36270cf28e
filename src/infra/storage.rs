use anyhow::Result;
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_config::Region;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use std::time::Duration;
use url::Url;

use crate::config::AppConfig;
use crate::infra::store::{check_upload, BlobStore, Caller, StoreError};

/// S3-compatible blob storage for post attachments.
#[derive(Clone)]
pub struct ObjectStorage {
    client: Client,
    bucket: String,
    public_endpoint: Option<String>,
    download_url_ttl_seconds: u64,
}

impl ObjectStorage {
    pub async fn new(config: &AppConfig) -> Result<Self> {
        let bucket = config
            .s3_bucket
            .clone()
            .ok_or_else(|| anyhow::anyhow!("missing required env var: S3_BUCKET"))?;
        let region_provider = RegionProviderChain::first_try(Region::new(config.s3_region.clone()));
        let shared_config = aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .load()
            .await;

        let mut s3_builder = aws_sdk_s3::config::Builder::from(&shared_config)
            .region(shared_config.region().cloned())
            .force_path_style(true);
        if let Some(endpoint) = &config.s3_endpoint {
            s3_builder = s3_builder.endpoint_url(endpoint.clone());
        }
        if let Some(provider) = shared_config.credentials_provider() {
            s3_builder = s3_builder.credentials_provider(provider);
        }
        let s3_config = s3_builder.build();

        Ok(Self {
            client: Client::from_conf(s3_config),
            bucket,
            public_endpoint: config.s3_public_endpoint.clone(),
            download_url_ttl_seconds: config.download_url_ttl_seconds,
        })
    }
}

fn sdk_error(err: impl std::fmt::Display) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

/// Stable public URL for an object when the bucket is served directly.
fn public_url(endpoint: &str, bucket: &str, key: &str) -> Result<String, StoreError> {
    let base = format!("{}/{}/", endpoint.trim_end_matches('/'), bucket);
    let url = Url::parse(&base)
        .and_then(|base| base.join(key))
        .map_err(|err| StoreError::Backend(format!("invalid public endpoint: {}", err)))?;
    Ok(url.to_string())
}

#[async_trait]
impl BlobStore for ObjectStorage {
    async fn upload_blob(
        &self,
        caller: &Caller,
        storage_path: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<(), StoreError> {
        check_upload(caller, storage_path)?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(storage_path)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn download_url(&self, storage_path: &str) -> Result<String, StoreError> {
        if let Some(endpoint) = &self.public_endpoint {
            return public_url(endpoint, &self.bucket, storage_path);
        }

        let presign_config =
            PresigningConfig::expires_in(Duration::from_secs(self.download_url_ttl_seconds))
                .map_err(sdk_error)?;
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(storage_path)
            .presigned(presign_config)
            .await
            .map_err(sdk_error)?;
        Ok(presigned.uri().to_string())
    }
}
