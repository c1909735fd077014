//! Shared fixtures for unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use diesel::pg::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool};

use crate::config::{AppConfig, AttachmentLimits};
use crate::context::HeaderContext;
use crate::state::AppState;
use crate::storage::ObjectStorage;

pub const TEST_ASSETS_BASE_URL: &str = "https://assets.aloy.test";

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Bytes,
    pub content_type: String,
    pub cache_control: String,
}

/// In-memory object store. `fail_after` makes every put past that many fail.
#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<String, StoredObject>>,
    puts: Mutex<usize>,
    fail_after: Option<usize>,
}

impl MemoryStorage {
    pub fn failing_after(puts: usize) -> Self {
        Self {
            fail_after: Some(puts),
            ..Self::default()
        }
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn put_object(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
        cache_control: &str,
    ) -> Result<()> {
        {
            let mut puts = self.puts.lock().unwrap();
            if self.fail_after.is_some_and(|limit| *puts >= limit) {
                bail!("storage unavailable");
            }
            *puts += 1;
        }
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
                cache_control: cache_control.to_string(),
            },
        );
        Ok(())
    }

    async fn delete_objects(&self, keys: &[String]) -> Result<()> {
        let mut objects = self.objects.lock().unwrap();
        for key in keys {
            objects.remove(key);
        }
        Ok(())
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: "postgres://localhost/aloy_unused".to_string(),
        database_max_pool_size: 1,
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        allow_origins: None,
        assets_base_url: TEST_ASSETS_BASE_URL.to_string(),
        attachments: AttachmentLimits::default(),
        storage_endpoint: None,
        storage_access_key_id: None,
        storage_access_key_secret: None,
        storage_region: "auto".to_string(),
        storage_bucket: "aloy-test".to_string(),
    }
}

/// State whose pool never connects; fine for anything that stays off the database.
pub fn test_state() -> AppState {
    test_state_with(test_config(), Arc::new(MemoryStorage::default()))
}

pub fn test_state_with(config: AppConfig, storage: Arc<dyn ObjectStorage>) -> AppState {
    let manager = ConnectionManager::<PgConnection>::new(config.database_url.clone());
    let pool = Pool::builder().max_size(1).build_unchecked(manager);
    AppState::new(pool, config, storage, Arc::new(HeaderContext))
}

pub enum FormPart<'a> {
    Text {
        name: &'a str,
        value: &'a str,
    },
    File {
        name: &'a str,
        file_name: &'a str,
        content_type: &'a str,
        bytes: &'a [u8],
    },
}

impl<'a> FormPart<'a> {
    pub fn text(name: &'a str, value: &'a str) -> Self {
        FormPart::Text { name, value }
    }

    pub fn file(
        name: &'a str,
        file_name: &'a str,
        content_type: &'a str,
        bytes: &'a [u8],
    ) -> Self {
        FormPart::File {
            name,
            file_name,
            content_type,
            bytes,
        }
    }
}

/// Encodes `parts` as `multipart/form-data`, returning the content type and body.
pub fn multipart_body(parts: &[FormPart<'_>]) -> (String, Vec<u8>) {
    let boundary = "aloy-test-boundary";
    let mut body = Vec::new();
    for part in parts {
        body.extend(format!("--{boundary}\r\n").as_bytes());
        match part {
            FormPart::Text { name, value } => {
                body.extend(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                );
                body.extend(value.as_bytes());
            }
            FormPart::File {
                name,
                file_name,
                content_type,
                bytes,
            } => {
                body.extend(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n"
                    )
                    .as_bytes(),
                );
                body.extend(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
                body.extend(*bytes);
            }
        }
        body.extend(b"\r\n");
    }
    body.extend(format!("--{boundary}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={boundary}"), body)
}

/// Encodes a solid `width`×`height` PNG.
pub fn png_bytes(width: u32, height: u32, pixel: [u8; 4]) -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(width, height, image::Rgba(pixel));
    let mut buffer = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut buffer, image::ImageFormat::Png)
        .unwrap();
    buffer.into_inner()
}
