//! Classifier API handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

use sift_core::{ClassifierStats, Prediction, TrainReport};

use crate::{AppError, AppState};

#[derive(Debug, Default, Deserialize)]
pub struct TrainRequest {
    /// Override the configured minimum sample count
    pub min_samples: Option<usize>,
}

/// POST /api/classifier/train - Retrain from user-confirmed transactions
///
/// Too little data is not an error: the report says `insufficient_data`
/// and the current model stays in place.
pub async fn train_classifier(
    State(state): State<Arc<AppState>>,
    body: Option<Json<TrainRequest>>,
) -> Result<Json<TrainReport>, AppError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let report = state.engine.train_classifier(body.min_samples).await?;
    Ok(Json(report))
}

/// GET /api/classifier/stats - Current artifact metadata
pub async fn classifier_stats(State(state): State<Arc<AppState>>) -> Json<ClassifierStats> {
    Json(state.engine.classifier_stats())
}

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub transaction_id: i64,
    pub prediction: Option<Prediction>,
}

/// GET /api/classifier/predict/:id - Raw model output, bypassing rules
pub async fn predict(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<PredictResponse>, AppError> {
    let prediction = state.engine.predict(id)?;
    Ok(Json(PredictResponse {
        transaction_id: id,
        prediction,
    }))
}
