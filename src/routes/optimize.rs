use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use tracing::{error, info};

use crate::errors::AppError;
use crate::models::{OptimizeRequest, OptimizeResponse};
use crate::services::optimization_cache::OptimizationCache;
use crate::services::optimization_service::{optimize, OptimizerSettings};
use crate::services::price_service;
use crate::state::AppState;

const MAX_TICKERS: usize = 25;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(optimize_portfolio))
}

/// POST /api/optimize
///
/// Body: `{"tickers": ["TCS.NS", "INFY.NS"], "capital": 100000}`
pub async fn optimize_portfolio(
    State(state): State<AppState>,
    Json(request): Json<OptimizeRequest>,
) -> Result<Json<OptimizeResponse>, AppError> {
    let tickers = price_service::normalize_tickers(&request.tickers);
    let capital = request.capital;

    if tickers.len() < 2 {
        return Err(AppError::Validation(
            "at least 2 distinct tickers are required".to_string(),
        ));
    }
    if tickers.len() > MAX_TICKERS {
        return Err(AppError::Validation(format!(
            "at most {} tickers can be optimized at once",
            MAX_TICKERS
        )));
    }
    if !capital.is_finite() || capital <= 0.0 {
        return Err(AppError::Validation("capital must be a positive number".to_string()));
    }

    info!("POST /api/optimize - {} tickers, capital {:.2}", tickers.len(), capital);

    let cache_key = OptimizationCache::cache_key(&tickers, capital);
    if let Some(cached) = state.optimization_cache.get(&cache_key) {
        info!("✓ Returning cached optimization for {}", tickers.join(","));
        return Ok(Json(cached.as_ref().clone()));
    }

    let history = price_service::fetch_aligned_history(
        state.price_provider.as_ref(),
        &tickers,
        state.config.lookback_days,
        &state.failure_cache,
    )
    .await?;

    if history.series.len() < 2 {
        return Err(AppError::InsufficientData(format!(
            "need price history for at least 2 tickers; no data for {}",
            history.dropped.join(", ")
        )));
    }

    let settings = OptimizerSettings::with_risk_free_rate(state.config.risk_free_rate);
    let series = history.series;
    let mut response = tokio::task::spawn_blocking(move || optimize(&series, capital, &settings))
        .await
        .map_err(|e| {
            error!("Optimization task failed: {}", e);
            AppError::Internal(e.to_string())
        })??;

    // Tickers lost during acquisition come before those the engine rejected
    let mut dropped = history.dropped;
    dropped.append(&mut response.input.dropped_tickers);
    response.input.dropped_tickers = dropped;

    state
        .optimization_cache
        .insert(cache_key, Arc::new(response.clone()));

    Ok(Json(response))
}
