//! Object routes.
//!
//! Writes and deletes go straight to the store and raise notifications.
//! Reads, heads and listings go through the filtering access layer as the
//! caller named in the `x-lifewire-account` header.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use lifewire_filter::{ByteRange, ReadOptions};
use lifewire_types::{ObjectMeta, ObjectReference, OperationKind};
use serde::{Deserialize, Serialize};

use crate::api::ApiError;
use crate::AppState;

/// Header carrying the caller's account.
pub const ACCOUNT_HEADER: &str = "x-lifewire-account";

fn caller(headers: &HeaderMap) -> String {
    headers
        .get(ACCOUNT_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// Query parameters for single-object reads.
#[derive(Debug, Default, Deserialize)]
pub struct ReadQuery {
    /// Part to read; objects are single-part.
    #[serde(rename = "partNumber")]
    pub part_number: Option<u32>,
}

fn read_options(headers: &HeaderMap, query: &ReadQuery) -> Result<ReadOptions, ApiError> {
    let range = headers
        .get(header::RANGE)
        .map(|v| {
            v.to_str()
                .map_err(|_| ApiError::BadRequest("Range header is not ASCII".to_string()))?
                .parse::<ByteRange>()
                .map_err(|e| ApiError::RangeNotSatisfiable(e.to_string()))
        })
        .transpose()?;
    Ok(ReadOptions {
        range,
        part_number: query.part_number,
        timeout: None,
    })
}

fn header_value(value: impl ToString) -> Option<HeaderValue> {
    HeaderValue::from_str(&value.to_string()).ok()
}

/// Handler for `PUT /api/objects/{location}/{*key}`.
pub async fn put_object_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((location, key)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<ObjectMeta>, ApiError> {
    let object = ObjectReference::new(location, key);
    let meta = state.store.put_object(&object, body).await?;
    tracing::info!(object = %object, size = meta.size, "object stored");
    Ok(Json(meta))
}

/// Response body for `DELETE /api/objects/{location}/{*key}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    /// Whether an object was removed.
    pub deleted: bool,
}

/// Handler for `DELETE /api/objects/{location}/{*key}`. Deleting a missing
/// object succeeds with `deleted: false`.
pub async fn delete_object_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((location, key)): Path<(String, String)>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let object = ObjectReference::new(location, key);
    let deleted = state.store.delete_object(&object).await?;
    Ok(Json(DeleteResponse { deleted }))
}

/// Handler for `GET /api/objects/{location}/{*key}`.
pub async fn get_object_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((location, key)): Path<(String, String)>,
    Query(query): Query<ReadQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let object = ObjectReference::new(location, key);
    let options = read_options(&headers, &query)?;
    let body = state.layer.get(&caller(&headers), &object, options).await?;

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    Ok((StatusCode::OK, response_headers, body).into_response())
}

/// Handler for `HEAD /api/objects/{location}/{*key}`.
///
/// `Content-Length` is the length of the body a `GET` with the same options
/// would return.
pub async fn head_object_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((location, key)): Path<(String, String)>,
    Query(query): Query<ReadQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let object = ObjectReference::new(location, key);
    let options = read_options(&headers, &query)?;
    let head = state.layer.head(&caller(&headers), &object, options).await?;

    let mut response_headers = HeaderMap::new();
    if let Some(v) = header_value(head.content_length) {
        response_headers.insert(header::CONTENT_LENGTH, v);
    }
    if let Some(v) = header_value(format!("\"{}\"", head.etag)) {
        response_headers.insert(header::ETAG, v);
    }
    if let Some(v) = header_value(head.last_modified.to_rfc2822()) {
        response_headers.insert(header::LAST_MODIFIED, v);
    }
    Ok((StatusCode::OK, response_headers).into_response())
}

/// Query parameters for listings.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Only keys starting with this prefix.
    #[serde(default)]
    pub prefix: String,
    /// `2` selects `ListObjectsV2`.
    #[serde(rename = "list-type")]
    pub list_type: Option<u8>,
}

/// Response body for listings.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListResponse {
    /// Visible keys, sorted.
    pub keys: Vec<String>,
    /// The number of keys returned.
    pub count: usize,
}

/// Handler for `GET /api/objects/{location}`.
pub async fn list_objects_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(location): Path<String>,
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
) -> Result<Json<ListResponse>, ApiError> {
    let operation = match query.list_type {
        Some(2) => OperationKind::ListObjectsV2,
        None | Some(1) => OperationKind::ListObjects,
        Some(other) => {
            return Err(ApiError::BadRequest(format!("unsupported list-type {other}")));
        }
    };
    let keys = state
        .layer
        .list(&caller(&headers), &location, &query.prefix, operation, None)
        .await?;
    Ok(Json(ListResponse {
        count: keys.len(),
        keys,
    }))
}
