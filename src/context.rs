use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderName, HeaderValue},
};
use axum_extra::headers::{self, Header, HeaderMapExt};

use crate::error::{AppError, AppResult, ErrorCode};
use crate::state::AppState;

static APP_ID_HEADER: HeaderName = HeaderName::from_static("aloy-app-id");
static USER_ID_HEADER: HeaderName = HeaderName::from_static("aloy-user-id");

/// `Aloy-App-ID`: the tenant every row is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AloyAppId(pub String);

/// `Aloy-User-ID`: the internal id returned by `POST /v1/users`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AloyUserId(pub String);

fn decode_non_empty<'i, I>(values: &mut I) -> Result<String, headers::Error>
where
    I: Iterator<Item = &'i HeaderValue>,
{
    let value = values.next().ok_or_else(headers::Error::invalid)?;
    let text = value
        .to_str()
        .map_err(|_| headers::Error::invalid())?
        .trim();
    if text.is_empty() {
        return Err(headers::Error::invalid());
    }
    Ok(text.to_string())
}

fn encode_text<E: Extend<HeaderValue>>(text: &str, values: &mut E) {
    if let Ok(value) = HeaderValue::from_str(text) {
        values.extend(std::iter::once(value));
    }
}

impl Header for AloyAppId {
    fn name() -> &'static HeaderName {
        &APP_ID_HEADER
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        decode_non_empty(values).map(Self)
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        encode_text(&self.0, values);
    }
}

impl Header for AloyUserId {
    fn name() -> &'static HeaderName {
        &USER_ID_HEADER
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        decode_non_empty(values).map(Self)
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        encode_text(&self.0, values);
    }
}

/// Resolves who is calling. Swappable so tests can pin identities without headers.
pub trait RequestContextResolver: Send + Sync + 'static {
    fn app_id(&self, parts: &Parts) -> AppResult<String>;
    fn user_id(&self, parts: &Parts) -> AppResult<i64>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderContext;

impl RequestContextResolver for HeaderContext {
    fn app_id(&self, parts: &Parts) -> AppResult<String> {
        parts
            .headers
            .typed_get::<AloyAppId>()
            .map(|AloyAppId(app_id)| app_id)
            .ok_or(AppError::Code(ErrorCode::MissingAppId))
    }

    fn user_id(&self, parts: &Parts) -> AppResult<i64> {
        let AloyUserId(raw) = parts
            .headers
            .typed_get::<AloyUserId>()
            .ok_or(AppError::Code(ErrorCode::MissingUserId))?;
        raw.parse()
            .map_err(|_| AppError::Code(ErrorCode::Invalid))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppId(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: i64,
}

#[async_trait]
impl FromRequestParts<AppState> for AppId {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        state.context.app_id(parts).map(AppId)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        state
            .context
            .user_id(parts)
            .map(|id| CurrentUser { id })
    }
}
