use std::sync::Arc;

use diesel::pg::PgConnection;

use crate::{
    attachments::AttachmentProcessor,
    config::AppConfig,
    context::RequestContextResolver,
    db::PgPool,
    error::AppResult,
    storage::ObjectStorage,
    validation::Validator,
};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn ObjectStorage>,
    pub context: Arc<dyn RequestContextResolver>,
    pub validator: Validator,
    pub attachments: AttachmentProcessor,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: AppConfig,
        storage: Arc<dyn ObjectStorage>,
        context: Arc<dyn RequestContextResolver>,
    ) -> Self {
        let attachments = AttachmentProcessor::new(
            config.attachments.clone(),
            config.attachment_base_url(),
            storage.clone(),
        );
        Self {
            pool,
            config: Arc::new(config),
            storage,
            context,
            validator: Validator::new(),
            attachments,
        }
    }

    /// Runs `f` on a blocking thread with its own pooled connection.
    pub async fn with_conn<F, T>(&self, f: F) -> AppResult<T>
    where
        F: FnOnce(&mut PgConnection) -> AppResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await?
    }

    /// Storage key for a public attachment URL, if it points into our bucket.
    pub fn storage_key_for_url<'a>(&self, url: &'a str) -> Option<&'a str> {
        let prefix = format!("{}/", self.config.assets_base_url);
        url.strip_prefix(prefix.as_str())
            .filter(|key| !key.is_empty())
    }
}
