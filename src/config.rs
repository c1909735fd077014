use std::env;

use anyhow::{anyhow, Context, Result};
use url::Url;

use crate::db::DEFAULT_MAX_POOL_SIZE;

pub const DEFAULT_ATTACHMENT_MAX_COUNT: usize = 3;
pub const DEFAULT_ATTACHMENT_MAX_SIZE: &str = "100kb";
pub const DEFAULT_ATTACHMENT_SUPPORTED_TYPES: &str = "image/gif,image/jpeg,image/png,image/webp";

#[derive(Clone, Debug)]
pub struct AttachmentLimits {
    pub max_count: usize,
    pub max_size: u64,
    pub supported_types: Vec<String>,
}

impl Default for AttachmentLimits {
    fn default() -> Self {
        Self {
            max_count: DEFAULT_ATTACHMENT_MAX_COUNT,
            max_size: 100_000,
            supported_types: split_list(DEFAULT_ATTACHMENT_SUPPORTED_TYPES),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_pool_size: u32,
    pub server_host: String,
    pub server_port: u16,
    pub allow_origins: Option<String>,
    pub assets_base_url: String,
    pub attachments: AttachmentLimits,
    pub storage_endpoint: Option<String>,
    pub storage_access_key_id: Option<String>,
    pub storage_access_key_secret: Option<String>,
    pub storage_region: String,
    pub storage_bucket: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let database_max_pool_size = env::var("DATABASE_MAX_POOL_SIZE")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_MAX_POOL_SIZE);
        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let server_port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("PORT must be a valid u16")?;
        let allow_origins = env::var("ALLOW_ORIGINS")
            .ok()
            .filter(|value| !value.trim().is_empty());
        let assets_base_url = env::var("ASSETS_BASE_URL")
            .unwrap_or_default()
            .trim_end_matches('/')
            .to_string();

        let max_count = env::var("ATTACHMENT_MAX_COUNT")
            .unwrap_or_else(|_| DEFAULT_ATTACHMENT_MAX_COUNT.to_string())
            .parse()
            .context("ATTACHMENT_MAX_COUNT must be a non-negative integer")?;
        let max_size = parse_byte_size(
            &env::var("ATTACHMENT_MAX_SIZE")
                .unwrap_or_else(|_| DEFAULT_ATTACHMENT_MAX_SIZE.to_string()),
        )
        .context("ATTACHMENT_MAX_SIZE must be a size such as 100kb")?;
        let supported_types = split_list(
            &env::var("ATTACHMENT_SUPPORTED_TYPES")
                .unwrap_or_else(|_| DEFAULT_ATTACHMENT_SUPPORTED_TYPES.to_string()),
        );

        let storage_endpoint = env::var("STORAGE_ENDPOINT").ok();
        let storage_access_key_id = env::var("STORAGE_ACCESS_KEY_ID").ok();
        let storage_access_key_secret = env::var("STORAGE_ACCESS_KEY_SECRET").ok();
        let storage_region = env::var("STORAGE_REGION").unwrap_or_else(|_| "auto".to_string());
        let storage_bucket = env::var("STORAGE_BUCKET").unwrap_or_else(|_| "aloy".to_string());

        Ok(Self {
            database_url,
            database_max_pool_size,
            server_host,
            server_port,
            allow_origins,
            assets_base_url,
            attachments: AttachmentLimits {
                max_count,
                max_size,
                supported_types,
            },
            storage_endpoint,
            storage_access_key_id,
            storage_access_key_secret,
            storage_region,
            storage_bucket,
        })
    }

    pub fn redacted_database_url(&self) -> String {
        redact_database_url(&self.database_url)
    }

    /// Public URL prefix attachments are served from.
    pub fn attachment_base_url(&self) -> String {
        format!("{}/attachments", self.assets_base_url)
    }
}

/// Parses sizes like `100`, `100b`, `100kb` or `1.5mb`. Units are decimal.
pub fn parse_byte_size(raw: &str) -> Result<u64> {
    let normalized = raw.trim().to_ascii_lowercase();
    let split_at = normalized
        .find(|ch: char| !(ch.is_ascii_digit() || ch == '.'))
        .unwrap_or(normalized.len());
    let (number, unit) = normalized.split_at(split_at);

    let value: f64 = number
        .parse()
        .map_err(|_| anyhow!("invalid size number in {raw:?}"))?;
    let multiplier: f64 = match unit.trim() {
        "" | "b" => 1.0,
        "k" | "kb" => 1e3,
        "m" | "mb" => 1e6,
        "g" | "gb" => 1e9,
        other => return Err(anyhow!("unknown size unit {other:?}")),
    };

    Ok((value * multiplier) as u64)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}

fn redact_database_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) => {
            let _ = parsed.set_password(Some("*****"));
            parsed.to_string()
        }
        Err(_) => "***".to_string(),
    }
}
