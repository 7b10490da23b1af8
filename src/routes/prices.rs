use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::errors::AppError;
use crate::models::PricePoint;
use crate::services;
use crate::state::AppState;

const DEFAULT_HISTORY_DAYS: u32 = 252;
const MAX_HISTORY_DAYS: u32 = 5000;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:ticker/history", get(get_history))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub days: Option<u32>,
}

/// GET /api/prices/:ticker/history?days=N
pub async fn get_history(
    Path(ticker): Path<String>,
    Query(query): Query<HistoryQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<PricePoint>>, AppError> {
    let ticker = ticker.trim().to_uppercase();
    if ticker.is_empty() {
        return Err(AppError::Validation("ticker must not be empty".to_string()));
    }
    let days = query
        .days
        .unwrap_or(DEFAULT_HISTORY_DAYS)
        .clamp(2, MAX_HISTORY_DAYS);

    info!("GET /api/prices/{}/history - Fetching {} days", ticker, days);
    let prices = services::price_service::fetch_history(
        state.price_provider.as_ref(),
        &state.failure_cache,
        &ticker,
        days,
    )
    .await
    .map_err(|e| {
        match &e {
            AppError::RateLimited => warn!("Rate limited when fetching history for {}", ticker),
            _ => error!("Failed to fetch price history for {}: {}", ticker, e),
        }
        e
    })?;

    Ok(Json(prices))
}
