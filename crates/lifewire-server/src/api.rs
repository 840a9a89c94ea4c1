//! Error mapping and the event, subscription and report handlers.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use lifewire_filter::AccessError;
use lifewire_observe::{query_reports, OperatorReport, ReportFilter, ReportKind};
use lifewire_orchestrator::DispatchResult;
use lifewire_store::StoreError;
use lifewire_types::NotificationSubscription;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::AppState;

/// Errors returned by the HTTP handlers, rendered as `{"error": "..."}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("access denied: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("range not satisfiable: {0}")]
    RangeNotSatisfiable(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::RangeNotSatisfiable(msg) => (StatusCode::RANGE_NOT_SATISFIABLE, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<AccessError> for ApiError {
    fn from(err: AccessError) -> Self {
        let message = err.to_string();
        match err {
            AccessError::AccessDenied { .. } => ApiError::Forbidden(message),
            AccessError::NotFound(_) | AccessError::UnknownLocation(_) => {
                ApiError::NotFound(message)
            }
            AccessError::Timeout(_) | AccessError::Unavailable(_) => {
                ApiError::Unavailable(message)
            }
            AccessError::InvalidRange(_) => ApiError::RangeNotSatisfiable(message),
            AccessError::UnsupportedFeature(_)
            | AccessError::InvalidPartNumber(_)
            | AccessError::InvalidRequest(_) => ApiError::BadRequest(message),
            AccessError::Filter(_) | AccessError::Store(_) => {
                ApiError::InternalServerError(message)
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let message = err.to_string();
        match err {
            StoreError::NotFound(_) => ApiError::NotFound(message),
            StoreError::AlreadyExists(_) | StoreError::Conflict { .. } => {
                ApiError::Conflict(message)
            }
            StoreError::Timeout(_) | StoreError::Unavailable(_) => ApiError::Unavailable(message),
            StoreError::Backend(_) => ApiError::InternalServerError(message),
        }
    }
}

/// Response body for `POST /api/events`.
#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    /// How many rules matched.
    pub dispatched: usize,
    /// One entry per matched rule.
    pub results: Vec<Value>,
}

impl IngestResponse {
    fn new(results: &[DispatchResult]) -> Self {
        Self {
            dispatched: results.len(),
            results: results
                .iter()
                .filter_map(|r| serde_json::to_value(r).ok())
                .collect(),
        }
    }
}

/// Handler for `POST /api/events`.
///
/// Routes one event-bus envelope and waits for every matched handler.
/// A malformed envelope is a 400 and dispatches nothing.
pub async fn ingest_event_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(envelope): Json<Value>,
) -> Result<Json<IngestResponse>, ApiError> {
    let results = state
        .router
        .dispatch_envelope(&envelope)
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(Json(IngestResponse::new(&results)))
}

/// Response body for `GET /api/subscriptions/{location}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubscriptionsResponse {
    /// The store's Active subscriptions at the location.
    pub subscriptions: Vec<NotificationSubscription>,
    /// How many there are.
    pub count: usize,
}

/// Handler for `GET /api/subscriptions/{location}`.
pub async fn list_subscriptions_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(location): Path<String>,
) -> Result<Json<SubscriptionsResponse>, ApiError> {
    let subscriptions = state.store.get_subscriptions(&location).await?;
    Ok(Json(SubscriptionsResponse {
        count: subscriptions.len(),
        subscriptions,
    }))
}

/// Query parameters for `GET /api/reports`.
#[derive(Debug, Deserialize)]
pub struct ReportsQuery {
    /// Filter by report kind (e.g., `SUBSCRIPTION_CONFLICT`).
    pub kind: Option<String>,
    /// Filter by subject.
    pub subject: Option<String>,
    /// Return reports written at or after this ISO 8601 timestamp.
    pub since: Option<String>,
    /// Return reports after this sequence number.
    pub after_seq: Option<i64>,
    /// Maximum number of reports to return (default: 100, max: 1000).
    pub limit: Option<i64>,
}

/// Response body for `GET /api/reports`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReportsResponse {
    /// Matching reports in sequence order.
    pub reports: Vec<OperatorReport>,
    /// The number of reports returned.
    pub count: usize,
}

/// Handler for `GET /api/reports`.
pub async fn get_reports_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<ReportsQuery>,
) -> Result<Json<ReportsResponse>, ApiError> {
    let kind = params
        .kind
        .as_deref()
        .map(str::parse::<ReportKind>)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let filter = ReportFilter {
        kind,
        subject: params.subject,
        since: params.since,
        after_seq: params.after_seq,
        limit: params.limit,
    };

    let pool = state.pool.clone();
    let reports = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| {
            ApiError::InternalServerError(format!("db connection failed: {}", e))
        })?;
        query_reports(&conn, &filter).map_err(|e| ApiError::InternalServerError(e.to_string()))
    })
    .await
    .map_err(|e| ApiError::InternalServerError(format!("task join error: {}", e)))??;

    Ok(Json(ReportsResponse {
        count: reports.len(),
        reports,
    }))
}
