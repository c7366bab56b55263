//! Category directory handlers

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use sift_core::models::Category;

use crate::{AppError, AppState};

#[derive(Debug, Deserialize)]
pub struct CategoriesQuery {
    /// Restrict to income (true) or spending (false) categories
    pub is_income: Option<bool>,
}

/// GET /api/categories - List categories
pub async fn list_categories(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CategoriesQuery>,
) -> Result<Json<Vec<Category>>, AppError> {
    let db = state.engine.db();
    let categories = match params.is_income {
        Some(is_income) => db.list_categories_by_income(is_income)?,
        None => db.list_categories()?,
    };
    Ok(Json(categories))
}
