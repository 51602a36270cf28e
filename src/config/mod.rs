use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::app::composer::ResetPolicy;

const DEFAULT_TRENDING_URL: &str = "https://jsonkeeper.com/b/NKEV";
const DEFAULT_FOLLOW_URL: &str = "https://jsonkeeper.com/b/WWMJ";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Postgres,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "memory" => Ok(Self::Memory),
            "postgres" => Ok(Self::Postgres),
            other => Err(format!("unknown store backend: {}", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlobBackend {
    Memory,
    S3,
}

impl FromStr for BlobBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "memory" => Ok(Self::Memory),
            "s3" => Ok(Self::S3),
            other => Err(format!("unknown blob backend: {}", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub http_addr: String,
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub db_connect_timeout_seconds: u64,
    pub blob_backend: BlobBackend,
    pub s3_endpoint: Option<String>,
    pub s3_public_endpoint: Option<String>,
    pub s3_region: String,
    pub s3_bucket: Option<String>,
    pub download_url_ttl_seconds: u64,
    pub public_base_url: String,
    pub session_key: [u8; 32],
    pub session_ttl_hours: u64,
    pub trending_url: Option<String>,
    pub follow_url: Option<String>,
    pub widgets_timeout_seconds: u64,
    pub composer_reset_policy: ResetPolicy,
    pub composer_idle_seconds: u64,
    pub upload_max_bytes: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let http_addr = env_or("HTTP_ADDR", "0.0.0.0:8080");
        let _parsed_http_addr = SocketAddr::from_str(&http_addr)
            .map_err(|err| anyhow!("invalid HTTP_ADDR: {}", err))?;

        let store_backend: StoreBackend = env_or_parse("STORE_BACKEND", "memory")?;
        let database_url = std::env::var("DATABASE_URL").ok();
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(anyhow!("missing required env var: DATABASE_URL"));
        }

        let blob_backend: BlobBackend = env_or_parse("BLOB_BACKEND", "memory")?;
        let s3_bucket = std::env::var("S3_BUCKET").ok();
        if blob_backend == BlobBackend::S3 && s3_bucket.is_none() {
            return Err(anyhow!("missing required env var: S3_BUCKET"));
        }

        Ok(Self {
            http_addr,
            store_backend,
            database_url,
            db_max_connections: env_or_parse("DB_MAX_CONNECTIONS", "10")?,
            db_connect_timeout_seconds: env_or_parse("DB_CONNECT_TIMEOUT_SECONDS", "5")?,
            blob_backend,
            s3_endpoint: std::env::var("S3_ENDPOINT").ok(),
            s3_public_endpoint: std::env::var("S3_PUBLIC_ENDPOINT").ok(),
            s3_region: env_or("S3_REGION", "fr-par"),
            s3_bucket,
            download_url_ttl_seconds: env_or_parse("DOWNLOAD_URL_TTL_SECONDS", "604800")?,
            public_base_url: env_or("PUBLIC_BASE_URL", "memory://blobs"),
            session_key: env_key_32("SESSION_KEY")?,
            session_ttl_hours: env_or_parse("SESSION_TTL_HOURS", "720")?,
            trending_url: env_url_or("TRENDING_URL", DEFAULT_TRENDING_URL),
            follow_url: env_url_or("FOLLOW_URL", DEFAULT_FOLLOW_URL),
            widgets_timeout_seconds: env_or_parse("WIDGETS_TIMEOUT_SECONDS", "5")?,
            composer_reset_policy: env_or_parse("COMPOSER_RESET_POLICY", "always")?,
            composer_idle_seconds: env_or_parse("COMPOSER_IDLE_SECONDS", "900")?,
            upload_max_bytes: env_or_parse("UPLOAD_MAX_BYTES", "10485760")?,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or_err(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| anyhow!("missing required env var: {}", key))
}

/// Unset falls back to `default`; set-but-empty disables the feed.
fn env_url_or(key: &str, default: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(value) if value.trim().is_empty() => None,
        Ok(value) => Some(value),
        Err(_) => Some(default.to_string()),
    }
}

fn env_or_parse<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let value = std::env::var(key).unwrap_or_else(|_| default.to_string());
    value
        .parse::<T>()
        .map_err(|err| anyhow!("invalid {}: {}", key, err))
}

fn env_key_32(key: &str) -> Result<[u8; 32]> {
    let value = env_or_err(key)?;
    decode_key_32(key, &value)
}

fn decode_key_32(key: &str, value: &str) -> Result<[u8; 32]> {
    let decoded = STANDARD
        .decode(value.as_bytes())
        .map_err(|err| anyhow!("invalid {}: {}", key, err))?;
    if decoded.len() != 32 {
        return Err(anyhow!("invalid {}: expected 32 bytes", key));
    }
    let mut key_bytes = [0u8; 32];
    key_bytes.copy_from_slice(&decoded);
    Ok(key_bytes)
}
