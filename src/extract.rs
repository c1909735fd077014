use std::collections::BTreeMap;

use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, Multipart, Request},
    http::header::CONTENT_TYPE,
};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::AppError;
use crate::state::AppState;
use crate::validation::Validate;

/// One file part of a multipart body.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// File parts grouped by form field name, in key order.
pub type FileParts = BTreeMap<String, Vec<UploadedFile>>;

/// A validated request payload read from either a JSON or a multipart body.
///
/// Text fields of a multipart body are decoded as if they were string members
/// of a JSON object, so the same payload type serves both encodings. Fields
/// carrying a file name are kept aside in `files`.
#[derive(Debug)]
pub struct Payload<T> {
    pub data: T,
    pub files: FileParts,
}

#[async_trait]
impl<T> FromRequest<AppState> for Payload<T>
where
    T: DeserializeOwned + Validate + Send,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let (value, files) = if is_multipart(&req) {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(AppError::internal)?;
            read_multipart(multipart).await?
        } else {
            let bytes = Bytes::from_request(req, state)
                .await
                .map_err(AppError::internal)?;
            (parse_json(&bytes)?, FileParts::new())
        };

        let mut data: T = serde_json::from_value(drop_nulls(value))?;
        state.validator.validate(&mut data)?;
        Ok(Self { data, files })
    }
}

fn is_multipart(req: &Request) -> bool {
    req.headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim_start().starts_with("multipart/form-data"))
        .unwrap_or(false)
}

/// Top-level `null` members read as absent, so they fall back to the field default.
fn drop_nulls(value: Value) -> Value {
    match value {
        Value::Object(members) => Value::Object(
            members
                .into_iter()
                .filter(|(_, member)| !member.is_null())
                .collect(),
        ),
        other => other,
    }
}

fn parse_json(bytes: &[u8]) -> Result<Value, AppError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Map::new()));
    }
    Ok(serde_json::from_slice(bytes)?)
}

async fn read_multipart(mut multipart: Multipart) -> Result<(Value, FileParts), AppError> {
    let mut fields = Map::new();
    let mut files = FileParts::new();

    while let Some(field) = multipart.next_field().await.map_err(AppError::internal)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        if field.file_name().is_some() {
            let file_name = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);
            let bytes = field.bytes().await.map_err(AppError::internal)?;
            files.entry(name).or_default().push(UploadedFile {
                file_name,
                content_type,
                bytes,
            });
        } else {
            let text = field.text().await.map_err(AppError::internal)?;
            // first value wins for repeated text fields
            fields.entry(name).or_insert(Value::String(text));
        }
    }

    Ok((Value::Object(fields), files))
}
