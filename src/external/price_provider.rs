use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub struct ExternalPricePoint {
    pub date: NaiveDate,
    pub close: f64,
}

#[derive(Debug, Error)]
pub enum PriceProviderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("bad response: {0}")]
    BadResponse(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("rate limited")]
    RateLimited,

    #[error("ticker not found: {0}")]
    NotFound(String),
}

#[async_trait]
pub trait PriceProvider: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &str;

    /// Daily closes in ascending date order, at most `days` trailing bars.
    async fn fetch_daily_history(
        &self,
        ticker: &str,
        days: u32,
    ) -> Result<Vec<ExternalPricePoint>, PriceProviderError>;
}

/// Sort ascending, drop duplicate dates and keep only the latest `days` bars.
pub(crate) fn keep_latest(mut points: Vec<ExternalPricePoint>, days: u32) -> Vec<ExternalPricePoint> {
    points.sort_by_key(|p| p.date);
    points.dedup_by_key(|p| p.date);

    let keep = days as usize;
    if days > 0 && points.len() > keep {
        points.drain(..points.len() - keep);
    }
    points
}
