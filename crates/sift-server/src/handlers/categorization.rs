//! Categorization API handlers
//!
//! Review queue, apply/learn, reset, auto-categorize, and the learned rules.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use sift_core::models::{
    CategorizationStats, Classification, Rule, RuleStats, Suggestion, TransactionWithSuggestion,
};
use sift_core::{
    ApplyResult, AutoCategorizeResult, BulkApplyResult, ResetResult, SimilarTransactions,
};

use crate::{
    AppError, AppState, SuccessResponse, DEFAULT_SUGGESTION_LIMIT, MAX_BULK_IDS,
    MAX_SUGGESTION_LIMIT,
};

fn default_true() -> bool {
    true
}

// ========== Suggestions ==========

#[derive(Debug, Deserialize)]
pub struct SuggestionsQuery {
    pub account_id: Option<i64>,
    pub limit: Option<i64>,
}

/// GET /api/categorization/suggestions - Review queue with one suggestion per row
///
/// The external backend is skipped here; ask per transaction for it.
pub async fn list_suggestions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SuggestionsQuery>,
) -> Result<Json<Vec<TransactionWithSuggestion>>, AppError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_SUGGESTION_LIMIT)
        .clamp(1, MAX_SUGGESTION_LIMIT);
    let rows = state
        .engine
        .suggestions(params.account_id, limit, false)
        .await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct SuggestQuery {
    #[serde(default)]
    pub external: bool,
}

/// GET /api/categorization/suggest/:id - Suggestion for one transaction
pub async fn suggest_one(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(params): Query<SuggestQuery>,
) -> Result<Json<Suggestion>, AppError> {
    let suggestion = state.engine.suggest_one(id, params.external).await?;
    Ok(Json(suggestion))
}

// ========== Apply ==========

#[derive(Debug, Deserialize)]
pub struct ApplyRequest {
    pub transaction_id: i64,
    pub classification: Classification,
    pub category_id: Option<i64>,
    #[serde(default = "default_true")]
    pub learn: bool,
}

/// POST /api/categorization/apply - Confirm a categorization and learn from it
pub async fn apply(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ApplyRequest>,
) -> Result<Json<ApplyResult>, AppError> {
    let result = state
        .engine
        .apply(
            body.transaction_id,
            body.classification,
            body.category_id,
            body.learn,
        )
        .await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct BulkApplyRequest {
    pub transaction_ids: Vec<i64>,
    pub classification: Classification,
    pub category_id: Option<i64>,
    #[serde(default = "default_true")]
    pub learn: bool,
}

/// POST /api/categorization/apply-bulk - Apply one decision to many transactions
pub async fn apply_bulk(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BulkApplyRequest>,
) -> Result<Json<BulkApplyResult>, AppError> {
    if body.transaction_ids.is_empty() {
        return Err(AppError::bad_request("transaction_ids must not be empty"));
    }
    if body.transaction_ids.len() > MAX_BULK_IDS {
        return Err(AppError::bad_request(&format!(
            "at most {} transaction_ids per request",
            MAX_BULK_IDS
        )));
    }

    let result = state
        .engine
        .apply_bulk(
            &body.transaction_ids,
            body.classification,
            body.category_id,
            body.learn,
        )
        .await?;
    Ok(Json(result))
}

/// GET /api/categorization/similar/:id - Rows an apply would propagate to
pub async fn find_similar(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<SimilarTransactions>, AppError> {
    Ok(Json(state.engine.find_similar(id)?))
}

#[derive(Debug, Deserialize)]
pub struct ResetQuery {
    #[serde(default = "default_true")]
    pub recategorize: bool,
}

/// POST /api/categorization/reset/:id - Remove the user lock
pub async fn reset(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(params): Query<ResetQuery>,
) -> Result<Json<ResetResult>, AppError> {
    let result = state.engine.reset(id, params.recategorize).await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct AutoCategorizeRequest {
    pub account_id: Option<i64>,
    /// false = dry run (count only)
    #[serde(default = "default_true")]
    pub apply: bool,
}

/// POST /api/categorization/auto - Categorize the queue above the threshold
pub async fn auto_categorize(
    State(state): State<Arc<AppState>>,
    body: Option<Json<AutoCategorizeRequest>>,
) -> Result<Json<AutoCategorizeResult>, AppError> {
    let body = body.map(|Json(b)| b).unwrap_or(AutoCategorizeRequest {
        account_id: None,
        apply: true,
    });
    let result = state
        .engine
        .auto_categorize(body.account_id, body.apply)
        .await?;
    Ok(Json(result))
}

/// GET /api/categorization/stats - Counts by categorization state
pub async fn categorization_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CategorizationStats>, AppError> {
    Ok(Json(state.engine.stats()?))
}

// ========== Rules ==========

#[derive(Debug, Deserialize)]
pub struct RulesQuery {
    #[serde(default)]
    pub min_confidence: f64,
}

#[derive(Debug, Serialize)]
pub struct RulesResponse {
    pub rules: Vec<Rule>,
    pub total: usize,
}

/// GET /api/categorization/rules - Learned rules, most confident first
pub async fn list_rules(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RulesQuery>,
) -> Result<Json<RulesResponse>, AppError> {
    if !(0.0..=1.0).contains(&params.min_confidence) {
        return Err(AppError::bad_request("min_confidence must be between 0 and 1"));
    }
    let rules = state.engine.rule_list(params.min_confidence)?;
    Ok(Json(RulesResponse {
        total: rules.len(),
        rules,
    }))
}

/// DELETE /api/categorization/rules/:id - Forget a rule
pub async fn delete_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<SuccessResponse>, AppError> {
    state.engine.rule_delete(id)?;
    Ok(Json(SuccessResponse { success: true }))
}

/// GET /api/categorization/rules/stats - Aggregate rule counters
pub async fn rule_stats(State(state): State<Arc<AppState>>) -> Result<Json<RuleStats>, AppError> {
    Ok(Json(state.engine.rule_stats()?))
}
