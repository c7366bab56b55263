//! Health check handler

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub classifier_trained: bool,
    pub external_configured: bool,
}

/// GET /api/health - Liveness plus engine capabilities
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        classifier_trained: state.engine.classifier_stats().trained,
        external_configured: state.engine.ai().is_some(),
    })
}
