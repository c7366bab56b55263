//! Transaction handlers
//!
//! Only the intake the engine needs: fetch one, insert one.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use sift_core::models::{NewTransaction, Transaction};

use crate::{AppError, AppState};

/// GET /api/transactions/:id - Get a transaction
pub async fn get_transaction(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Transaction>, AppError> {
    let tx = state
        .engine
        .db()
        .get_transaction(id)?
        .ok_or_else(|| AppError::not_found("Transaction not found"))?;
    Ok(Json(tx))
}

/// Request body for creating a transaction
///
/// Accepts an account name instead of an id so callers can post statement
/// rows without looking the account up first.
#[derive(Debug, Deserialize)]
pub struct CreateTransactionRequest {
    pub account: String,
    pub date: chrono::NaiveDate,
    pub amount: f64,
    pub merchant_code: Option<String>,
    pub details: Option<String>,
    pub type_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateTransactionResponse {
    pub id: i64,
    pub account_id: i64,
}

/// POST /api/transactions - Insert a transaction into the review queue
pub async fn create_transaction(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateTransactionRequest>,
) -> Result<Json<CreateTransactionResponse>, AppError> {
    let account = body.account.trim();
    if account.is_empty() {
        return Err(AppError::bad_request("account is required"));
    }
    if !body.amount.is_finite() {
        return Err(AppError::bad_request("amount must be a finite number"));
    }

    let db = state.engine.db();
    let account_id = db.upsert_account(account)?;
    let id = db.insert_transaction(&NewTransaction {
        account_id,
        date: body.date,
        amount: body.amount,
        merchant_code: body.merchant_code,
        details: body.details,
        type_code: body.type_code,
    })?;

    info!(transaction_id = id, account_id, "Transaction created");
    Ok(Json(CreateTransactionResponse { id, account_id }))
}
