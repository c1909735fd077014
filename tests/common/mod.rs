use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use aloy::config::{AppConfig, AttachmentLimits};
use aloy::context::HeaderContext;
use aloy::db::{self, PgPool, MIGRATIONS};
use aloy::routes;
use aloy::state::AppState;
use aloy::storage::ObjectStorage;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request};
use axum::Router;
use bytes::Bytes;
use diesel::connection::SimpleConnection;
use diesel::PgConnection;
use diesel_migrations::MigrationHarness;
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tower::util::ServiceExt;

#[allow(dead_code)]
pub const ASSETS_BASE_URL: &str = "https://assets.aloy.test";
#[allow(dead_code)]
pub const APP_ID: &str = "test-app";

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[allow(dead_code)]
#[derive(Clone)]
pub struct StoredObject {
    pub key: String,
    pub bytes: Bytes,
    pub content_type: String,
    pub cache_control: String,
}

#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<HashMap<String, StoredObject>>,
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn put_object(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
        cache_control: &str,
    ) -> Result<()> {
        let stored = StoredObject {
            key: key.to_string(),
            bytes,
            content_type: content_type.to_string(),
            cache_control: cache_control.to_string(),
        };
        let mut guard = self.objects.lock().await;
        guard.insert(stored.key.clone(), stored);
        Ok(())
    }

    async fn delete_objects(&self, keys: &[String]) -> Result<()> {
        let mut guard = self.objects.lock().await;
        for key in keys {
            guard.remove(key);
        }
        Ok(())
    }
}

impl FakeStorage {
    #[allow(dead_code)]
    pub async fn get(&self, key: &str) -> Option<StoredObject> {
        let guard = self.objects.lock().await;
        guard.get(key).cloned()
    }

    #[allow(dead_code)]
    pub async fn object_count(&self) -> usize {
        let guard = self.objects.lock().await;
        guard.len()
    }
}

/// Response status, headers of interest and decoded JSON body.
#[allow(dead_code)]
pub struct TestResponse {
    pub status: axum::http::StatusCode,
    pub total_count: Option<String>,
    pub body: Value,
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    storage: Arc<FakeStorage>,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        Self::with_limits(AttachmentLimits::default()).await
    }

    pub async fn with_limits(attachments: AttachmentLimits) -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;

        let config = AppConfig {
            database_url: database_url.clone(),
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            allow_origins: None,
            assets_base_url: ASSETS_BASE_URL.to_string(),
            attachments,
            storage_endpoint: None,
            storage_access_key_id: None,
            storage_access_key_secret: None,
            storage_region: "auto".to_string(),
            storage_bucket: "aloy-test".to_string(),
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let storage = Arc::new(FakeStorage::default());
        let storage_for_state: Arc<dyn ObjectStorage> = storage.clone();
        let state = AppState::new(pool, config, storage_for_state, Arc::new(HeaderContext));
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            storage,
        })
    }

    pub async fn cleanup(&self) -> Result<()> {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get cleanup connection: {err}"))?;
            truncate_all(&mut conn)?;
            Ok(())
        })
        .await
        .context("cleanup task panicked")?
    }

    #[allow(dead_code)]
    pub fn storage(&self) -> Arc<FakeStorage> {
        self.storage.clone()
    }

    /// Registers `external_id` through the API and returns the internal user id.
    #[allow(dead_code)]
    pub async fn create_user(&self, external_id: &str, name: &str) -> Result<i64> {
        let response = self
            .post_json(
                "/v1/users",
                &serde_json::json!({ "id": external_id, "name": name }),
                None,
            )
            .await?;
        response.body["user"]["id"]
            .as_i64()
            .ok_or_else(|| anyhow!("unexpected user response: {}", response.body))
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        user_id: Option<i64>,
    ) -> Result<TestResponse> {
        let body = serde_json::to_vec(payload)?;
        let builder = self
            .request(Method::POST, path, user_id)
            .header("content-type", "application/json");
        self.send(builder.body(Body::from(body))?).await
    }

    #[allow(dead_code)]
    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        user_id: Option<i64>,
    ) -> Result<TestResponse> {
        let body = serde_json::to_vec(payload)?;
        let builder = self
            .request(Method::PATCH, path, user_id)
            .header("content-type", "application/json");
        self.send(builder.body(Body::from(body))?).await
    }

    #[allow(dead_code)]
    pub async fn post_raw(&self, path: &str, body: &str, user_id: Option<i64>) -> Result<TestResponse> {
        let builder = self
            .request(Method::POST, path, user_id)
            .header("content-type", "text/plain");
        self.send(builder.body(Body::from(body.to_string()))?).await
    }

    #[allow(dead_code)]
    pub async fn get(&self, path: &str, user_id: Option<i64>) -> Result<TestResponse> {
        let builder = self.request(Method::GET, path, user_id);
        self.send(builder.body(Body::empty())?).await
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, user_id: Option<i64>) -> Result<TestResponse> {
        let builder = self.request(Method::DELETE, path, user_id);
        self.send(builder.body(Body::empty())?).await
    }

    /// Sends a multipart form of text fields and `(field, file name, content type, bytes)` files.
    #[allow(dead_code)]
    pub async fn post_multipart(
        &self,
        path: &str,
        fields: &[(&str, &str)],
        files: &[(&str, &str, &str, &[u8])],
        user_id: Option<i64>,
    ) -> Result<TestResponse> {
        let boundary = "aloy-integration-boundary";
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            body.extend(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            );
            body.extend(value.as_bytes());
            body.extend(b"\r\n");
        }
        for (name, file_name, content_type, data) in files {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            body.extend(
                format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n"
                )
                .as_bytes(),
            );
            body.extend(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
            body.extend(*data);
            body.extend(b"\r\n");
        }
        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let builder = self.request(Method::POST, path, user_id).header(
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        );
        self.send(builder.body(Body::from(body))?).await
    }

    #[allow(dead_code)]
    pub async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        user_id: Option<i64>,
    ) -> axum::http::request::Builder {
        let builder = Request::builder()
            .method(method)
            .uri(path)
            .header("aloy-app-id", APP_ID);
        match user_id {
            Some(id) => builder.header("aloy-user-id", id.to_string()),
            None => builder,
        }
    }

    async fn send(&self, request: Request<Body>) -> Result<TestResponse> {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response");
        let status = response.status();
        let total_count = response
            .headers()
            .get("x-total-count")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = body_to_vec(response.into_body()).await?;
        let body = serde_json::from_slice(&bytes).with_context(|| {
            format!(
                "response was not JSON: {}",
                String::from_utf8_lossy(&bytes)
            )
        })?;
        Ok(TestResponse {
            status,
            total_count,
            body,
        })
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

/// Encodes a 1×1 PNG of the given pixel.
#[allow(dead_code)]
pub fn tiny_png(pixel: [u8; 4]) -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(1, 1, image::Rgba(pixel));
    let mut buffer = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut buffer, image::ImageFormat::Png)
        .expect("encode png");
    buffer.into_inner()
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE attachments, comments, pins, users RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
