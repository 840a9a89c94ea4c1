//! Lifewire server library logic.

pub mod api;
pub mod api_objects;
pub mod config;
pub mod services;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Json, Router,
};
use lifewire_db::DbPool;
use lifewire_filter::FilteringAccessLayer;
use lifewire_orchestrator::EventRouter;
use lifewire_store::ObjectStore;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

pub use services::build_state;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// The object store, for writes and the subscription view.
    pub store: Arc<dyn ObjectStore>,
    /// The filtering access layer, for every read.
    pub layer: Arc<FilteringAccessLayer>,
    /// Routes ingested lifecycle events.
    pub router: Arc<EventRouter>,
}

/// Maximum request body size (16 MiB); bounds object uploads.
const MAX_REQUEST_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/events", post(api::ingest_event_handler))
        .route(
            "/api/subscriptions/{location}",
            get(api::list_subscriptions_handler),
        )
        .route("/api/reports", get(api::get_reports_handler))
        .route(
            "/api/objects/{location}",
            get(api_objects::list_objects_handler),
        )
        .route(
            "/api/objects/{location}/{*key}",
            get(api_objects::get_object_handler)
                .head(api_objects::head_object_handler)
                .put(api_objects::put_object_handler)
                .delete(api_objects::delete_object_handler),
        )
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
