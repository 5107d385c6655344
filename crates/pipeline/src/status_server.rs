//! Status HTTP server for heic-batch
//!
//! Exposes batch progress and finished previews to external UIs.

use crate::device::DeviceClass;
use crate::item::{ItemId, ItemView};
use crate::pipeline::Pipeline;
use crate::registry::BatchSummary;
use crate::worker::heif_supported;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Errors that can occur when running the status server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),
}

/// Body of `GET /summary`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryView {
    #[serde(flatten)]
    pub summary: BatchSummary,
    pub device_class: DeviceClass,
    pub is_constrained: bool,
    pub max_concurrent_conversions: u32,
    /// Whether this build can decode HEIC/HEIF containers
    pub heif_supported: bool,
}

/// Handler for GET /items
async fn get_items(State(pipeline): State<Arc<Pipeline>>) -> Json<Vec<ItemView>> {
    let items = pipeline.items();
    Json(items.iter().map(ItemView::from).collect())
}

/// Handler for GET /summary
async fn get_summary(State(pipeline): State<Arc<Pipeline>>) -> Json<SummaryView> {
    let plan = pipeline.plan();
    Json(SummaryView {
        summary: pipeline.summary(),
        device_class: plan.device_class,
        is_constrained: plan.device_class.is_constrained(),
        max_concurrent_conversions: plan.max_concurrent_conversions,
        heif_supported: heif_supported(),
    })
}

/// Handler for GET /items/:id/preview
///
/// Serves the converted bytes with the target MIME type. Unknown ids and
/// items without output get a 404.
async fn get_preview(State(pipeline): State<Arc<Pipeline>>, Path(id): Path<String>) -> Response {
    let Ok(id) = id.parse::<ItemId>() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some(item) = pipeline.item(id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match item.output() {
        Some(output) => (
            [(header::CONTENT_TYPE, item.settings.format().mime_type())],
            output.bytes.clone(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Creates the axum Router with the status endpoints
pub fn create_status_router(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .route("/items", get(get_items))
        .route("/items/:id/preview", get(get_preview))
        .route("/summary", get(get_summary))
        .with_state(pipeline)
}

/// Serves the status endpoints on `addr` until the task is dropped
pub async fn run_status_server(pipeline: Arc<Pipeline>, addr: SocketAddr) -> Result<(), ServerError> {
    let app = create_status_router(pipeline);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "status server listening");
    axum::serve(listener, app).await?;

    Ok(())
}
