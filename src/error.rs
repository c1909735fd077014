use std::collections::BTreeMap;
use std::fmt::{self, Display};

use axum::{
    http::{header::HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, error};

pub type AppResult<T> = Result<T, AppError>;

/// Field name to error code, rendered as `{"text": "INVALID"}`.
pub type FieldErrors = BTreeMap<String, ErrorCode>;

pub const TOTAL_COUNT_HEADER: &str = "x-total-count";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Invalid,
    TooMany,
    TooBig,
    Unsupported,
    MissingAppId,
    MissingUserId,
    NotFound,
    InternalServerError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Invalid => "INVALID",
            ErrorCode::TooMany => "TOO_MANY",
            ErrorCode::TooBig => "TOO_BIG",
            ErrorCode::Unsupported => "UNSUPPORTED",
            ErrorCode::MissingAppId => "MISSING_APP_ID",
            ErrorCode::MissingUserId => "MISSING_USER_ID",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::InternalServerError => "INTERNAL_SERVER_ERROR",
        }
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid fields: {0:?}")]
    Fields(FieldErrors),
    #[error("{0}")]
    Code(ErrorCode),
    #[error("resource not found")]
    NotFound,
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn internal<E: Display>(error: E) -> Self {
        Self::Internal(error.to_string())
    }

    pub fn field(name: impl Into<String>, code: ErrorCode) -> Self {
        Self::Fields(BTreeMap::from([(name.into(), code)]))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Fields(_) | AppError::Code(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The value placed in the `error` slot of the response envelope.
    /// Internal details never leave the process.
    pub fn body(&self) -> Value {
        match self {
            AppError::Fields(fields) => json!(fields),
            AppError::Code(code) => json!({ "code": code }),
            AppError::NotFound => json!({ "code": ErrorCode::NotFound }),
            AppError::Internal(_) => json!({ "code": ErrorCode::InternalServerError }),
        }
    }

    fn report(&self) {
        match self {
            AppError::Internal(detail) => error!(error = %detail, "request failed"),
            other => debug!(error = %other, "request rejected"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.report();
        (self.status(), Json(json!({ "error": self.body() }))).into_response()
    }
}

/// Standard response shape: `{<key>: <data|fallback>, "error": <null|error>}`.
pub struct Envelope<T> {
    key: &'static str,
    result: AppResult<T>,
    fallback: Value,
    total_count: Option<usize>,
}

impl<T: Serialize> Envelope<T> {
    pub fn new(key: &'static str, result: AppResult<T>) -> Self {
        Self {
            key,
            result,
            fallback: Value::Null,
            total_count: None,
        }
    }

    pub fn with_total_count(mut self, total: usize) -> Self {
        self.total_count = Some(total);
        self
    }
}

impl<T: Serialize> Envelope<Vec<T>> {
    /// List envelope under `nodes` (an empty list on error), advertising the node count in `X-Total-Count`.
    pub fn nodes(result: AppResult<Vec<T>>) -> Self {
        let total = result.as_ref().map(Vec::len).ok();
        let envelope = Self {
            fallback: Value::Array(Vec::new()),
            ..Self::new("nodes", result)
        };
        match total {
            Some(total) => envelope.with_total_count(total),
            None => envelope,
        }
    }
}

impl Envelope<bool> {
    pub fn success(result: AppResult<()>) -> Self {
        Self {
            key: "success",
            result: result.map(|_| true),
            fallback: Value::Bool(false),
            total_count: None,
        }
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        let serialized = self
            .result
            .and_then(|data| serde_json::to_value(data).map_err(AppError::from));

        let (status, data, error) = match serialized {
            Ok(data) => (StatusCode::OK, data, Value::Null),
            Err(err) => {
                err.report();
                (err.status(), self.fallback, err.body())
            }
        };

        let mut body = Map::new();
        body.insert(self.key.to_string(), data);
        body.insert("error".to_string(), error);

        let mut response = (status, Json(Value::Object(body))).into_response();
        if let (Some(total), true) = (self.total_count, status.is_success()) {
            response.headers_mut().insert(
                HeaderName::from_static(TOTAL_COUNT_HEADER),
                HeaderValue::from(total),
            );
        }
        response
    }
}

impl From<diesel::result::Error> for AppError {
    fn from(value: diesel::result::Error) -> Self {
        match value {
            diesel::result::Error::NotFound => AppError::NotFound,
            _ => AppError::internal(value),
        }
    }
}

impl From<diesel::r2d2::PoolError> for AppError {
    fn from(value: diesel::r2d2::PoolError) -> Self {
        AppError::internal(format!("database pool error: {value}"))
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(value: tokio::task::JoinError) -> Self {
        AppError::internal(format!("blocking task failed: {value}"))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        AppError::internal(format!("{value:#}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        AppError::internal(value)
    }
}
