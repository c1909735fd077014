use axum::http::{header::CONTENT_TYPE, HeaderName, HeaderValue};
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, patch, post},
    Router,
};
use serde::Serialize;
use serde_json::Value;
use tower_http::cors::{AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::{
    context::{AppId, CurrentUser},
    error::TOTAL_COUNT_HEADER,
    models::Attachment,
    state::AppState,
};

pub mod comments;
pub mod health;
pub mod pins;
pub mod users;

/// Multipart bodies carry a few small images; anything far beyond that is refused early.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// An attachment as embedded in pin and comment responses.
#[derive(Debug, Clone, Serialize)]
pub struct AttachmentView {
    pub id: i64,
    pub url: String,
    pub data: Value,
}

impl From<Attachment> for AttachmentView {
    fn from(attachment: Attachment) -> Self {
        Self {
            id: attachment.id,
            url: attachment.url,
            data: attachment.data,
        }
    }
}

/// Deletes the stored objects behind `urls`. Failures are logged, never reported.
pub(crate) async fn remove_stored_attachments(state: &AppState, urls: &[String]) {
    let keys: Vec<String> = urls
        .iter()
        .filter_map(|url| state.storage_key_for_url(url))
        .map(str::to_string)
        .collect();
    if keys.is_empty() {
        return;
    }
    match state.storage.delete_objects(&keys).await {
        Ok(()) => debug!(count = keys.len(), "removed attachment objects"),
        Err(err) => warn!(error = %format!("{err:#}"), count = keys.len(), "failed to remove attachment objects"),
    }
}

fn cors_layer(allow_origins: Option<&str>) -> CorsLayer {
    let allow_origin = match allow_origins {
        Some(origins) => {
            let origins: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|value| {
                    let trimmed = value.trim();
                    if trimmed.is_empty() {
                        return None;
                    }
                    match trimmed.parse::<HeaderValue>() {
                        Ok(origin) => Some(origin),
                        Err(_) => {
                            warn!(origin = trimmed, "ignoring invalid CORS origin");
                            None
                        }
                    }
                })
                .collect();
            AllowOrigin::list(origins)
        }
        None => AllowOrigin::any(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers([
            CONTENT_TYPE,
            HeaderName::from_static("aloy-app-id"),
            HeaderName::from_static("aloy-user-id"),
        ])
        .expose_headers([HeaderName::from_static(TOTAL_COUNT_HEADER)])
}

pub fn create_router(state: AppState) -> Router<()> {
    let cors = cors_layer(state.config.allow_origins.as_deref());

    let pin_routes = Router::new()
        .route("/", get(pins::list_pins).post(pins::create_pin))
        .route("/:id", delete(pins::delete_pin))
        .route("/:id/complete", post(pins::complete_pin))
        .route(
            "/:id/comments",
            get(comments::list_comments).post(comments::create_comment),
        );

    let comment_routes = Router::new().route(
        "/:id",
        patch(comments::update_comment).delete(comments::delete_comment),
    );

    let user_scoped = Router::new()
        .nest("/pins", pin_routes)
        .nest("/comments", comment_routes)
        .route_layer(middleware::from_extractor_with_state::<CurrentUser, _>(
            state.clone(),
        ));

    let v1 = Router::new()
        .route("/users", post(users::create_user))
        .merge(user_scoped)
        .route_layer(middleware::from_extractor_with_state::<AppId, _>(
            state.clone(),
        ));

    Router::new()
        .nest("/v1", v1)
        .route("/health", get(health::health_check))
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
