use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::AttachmentLimits;
use crate::error::{AppError, AppResult, ErrorCode, FieldErrors};
use crate::extract::{FileParts, UploadedFile};
use crate::storage::{ObjectStorage, DEFAULT_CACHE_CONTROL};

/// Form fields whose name starts with this are treated as attachments.
pub const ATTACHMENTS_FIELD: &str = "attachments";

pub const KEY_PREFIX: &str = "attachments/";

/// ThumbHash only accepts images up to 100×100.
const MAX_HASH_DIMENSION: u32 = 100;

static LAST_KEY_MILLIS: AtomicU64 = AtomicU64::new(0);

/// An uploaded attachment, ready to be stored as a row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedAttachment {
    pub key: String,
    pub url: String,
    pub data: Value,
}

#[derive(Clone)]
pub struct AttachmentProcessor {
    limits: Arc<AttachmentLimits>,
    base_url: Arc<str>,
    storage: Arc<dyn ObjectStorage>,
}

impl AttachmentProcessor {
    pub fn new(
        limits: AttachmentLimits,
        base_url: impl Into<String>,
        storage: Arc<dyn ObjectStorage>,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            limits: Arc::new(limits),
            base_url: Arc::from(base_url.trim_end_matches('/')),
            storage,
        }
    }

    /// Picks the attachment parts out of `files` and enforces the limits.
    ///
    /// A field with several parts is reported as `field.0`, `field.1`, …
    /// Exceeding the count limit short-circuits with a single `TOO_MANY`.
    pub fn select<'a>(&self, files: &'a FileParts) -> AppResult<Vec<(String, &'a UploadedFile)>> {
        let mut selected = Vec::new();
        for (name, parts) in files
            .iter()
            .filter(|(name, _)| name.starts_with(ATTACHMENTS_FIELD))
        {
            match parts.as_slice() {
                [single] => selected.push((name.clone(), single)),
                many => selected.extend(
                    many.iter()
                        .enumerate()
                        .map(|(index, part)| (format!("{name}.{index}"), part)),
                ),
            }
        }

        if selected.len() > self.limits.max_count {
            return Err(AppError::field(ATTACHMENTS_FIELD, ErrorCode::TooMany));
        }

        let mut errors = FieldErrors::new();
        for (key, file) in &selected {
            if file.bytes.len() as u64 > self.limits.max_size {
                errors.insert(key.clone(), ErrorCode::TooBig);
                continue;
            }
            let content_type = file.content_type.as_deref().unwrap_or_default();
            if !self
                .limits
                .supported_types
                .iter()
                .any(|supported| supported == content_type)
            {
                errors.insert(key.clone(), ErrorCode::Unsupported);
            }
        }

        if !errors.is_empty() {
            debug!(errors = ?errors, "rejected attachments");
            return Err(AppError::Fields(errors));
        }
        Ok(selected)
    }

    /// Validates, hashes and uploads every attachment part in `files`.
    ///
    /// Any failure after validation removes what this call already uploaded.
    pub async fn process(&self, files: &FileParts) -> AppResult<Vec<ProcessedAttachment>> {
        let selected = self.select(files)?;

        let mut processed: Vec<ProcessedAttachment> = Vec::with_capacity(selected.len());
        for (key, file) in selected {
            match self.upload(file).await {
                Ok(attachment) => processed.push(attachment),
                Err(err) => {
                    self.discard(&processed).await;
                    return Err(AppError::internal(format!(
                        "failed to process attachment {key}: {err:#}"
                    )));
                }
            }
        }
        Ok(processed)
    }

    /// Best-effort removal of objects that will not be referenced by any row.
    pub async fn discard(&self, attachments: &[ProcessedAttachment]) {
        if attachments.is_empty() {
            return;
        }
        let keys: Vec<String> = attachments.iter().map(|a| a.key.clone()).collect();
        if let Err(err) = self.storage.delete_objects(&keys).await {
            warn!(error = %format!("{err:#}"), count = keys.len(), "failed to discard uploaded attachments");
        }
    }

    async fn upload(&self, file: &UploadedFile) -> Result<ProcessedAttachment> {
        let bytes = file.bytes.clone();
        let hash = tokio::task::spawn_blocking(move || thumb_hash(&bytes))
            .await
            .context("thumbhash task panicked")??;

        let content_type = file.content_type.clone().unwrap_or_default();
        let file_name = format!(
            "{}{}",
            next_key_millis(),
            extension_of(file.file_name.as_deref())
        );
        let key = format!("{KEY_PREFIX}{file_name}");

        self.storage
            .put_object(&key, file.bytes.clone(), &content_type, DEFAULT_CACHE_CONTROL)
            .await?;

        Ok(ProcessedAttachment {
            url: format!("{}/{}", self.base_url, file_name),
            key,
            data: json!({ "type": content_type, "hash": hash }),
        })
    }
}

/// Base64 ThumbHash of an encoded GIF, JPEG, PNG or WebP image.
pub fn thumb_hash(bytes: &[u8]) -> Result<String> {
    let image = image::load_from_memory(bytes).context("failed to decode attachment image")?;
    let image = if image.width() > MAX_HASH_DIMENSION || image.height() > MAX_HASH_DIMENSION {
        image.thumbnail(MAX_HASH_DIMENSION, MAX_HASH_DIMENSION)
    } else {
        image
    };
    let rgba = image.to_rgba8();
    let hash = thumbhash::rgba_to_thumb_hash(
        rgba.width() as usize,
        rgba.height() as usize,
        rgba.as_raw(),
    );
    Ok(STANDARD.encode(hash))
}

/// Wall-clock milliseconds, bumped so no two calls in a process return the same value.
fn next_key_millis() -> u64 {
    let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
    let mut last = LAST_KEY_MILLIS.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST_KEY_MILLIS.compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed)
        {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}

fn extension_of(file_name: Option<&str>) -> String {
    file_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default()
}
