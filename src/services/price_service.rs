use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::NaiveDate;
use futures::future::join_all;
use tracing::{info, warn};

use crate::errors::AppError;
use crate::external::price_provider::{ExternalPricePoint, PriceProvider, PriceProviderError};
use crate::models::{AssetSeries, PricePoint};
use crate::services::failure_cache::{FailureCache, FailureType};

/// Close series for the requested tickers, restricted to the dates every
/// surviving ticker traded on.
#[derive(Debug, Clone, Default)]
pub struct AlignedHistory {
    pub series: Vec<AssetSeries>,
    pub dates: Vec<NaiveDate>,
    /// Tickers with no usable history from any provider
    pub dropped: Vec<String>,
}

/// Trim, uppercase and de-duplicate tickers, keeping first-occurrence order.
pub fn normalize_tickers(tickers: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    tickers
        .iter()
        .map(|t| t.trim().to_uppercase())
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

fn cached_failure_error(ticker: &str, error_type: FailureType) -> PriceProviderError {
    match error_type {
        FailureType::NotFound => PriceProviderError::NotFound(ticker.to_string()),
        FailureType::RateLimited => PriceProviderError::RateLimited,
        FailureType::ApiError => {
            PriceProviderError::BadResponse(format!("recent fetch for {} failed", ticker))
        }
    }
}

async fn fetch_points(
    provider: &dyn PriceProvider,
    failure_cache: &FailureCache,
    ticker: &str,
    days: u32,
) -> Result<Vec<ExternalPricePoint>, PriceProviderError> {
    if let Some(failure) = failure_cache.is_failed(ticker) {
        info!(
            "⚠️ Skipping fetch for {} - in failure cache ({:?}) until {}",
            ticker,
            failure.error_type,
            failure.retry_after()
        );
        return Err(cached_failure_error(ticker, failure.error_type));
    }

    match provider.fetch_daily_history(ticker, days).await {
        Ok(points) if !points.is_empty() => {
            failure_cache.clear(ticker);
            Ok(points)
        }
        Ok(_) => {
            failure_cache.record_failure(ticker, FailureType::NotFound);
            Err(PriceProviderError::NotFound(ticker.to_string()))
        }
        Err(e) => {
            warn!("Failed to fetch history for {}: {}", ticker, e);
            failure_cache.record_failure(ticker, FailureType::from(&e));
            Err(e)
        }
    }
}

/// Daily closes for one ticker, ascending, at most `days` bars.
pub async fn fetch_history(
    provider: &dyn PriceProvider,
    failure_cache: &FailureCache,
    ticker: &str,
    days: u32,
) -> Result<Vec<PricePoint>, AppError> {
    let points = fetch_points(provider, failure_cache, ticker, days).await?;
    Ok(points
        .into_iter()
        .map(|p| PricePoint {
            date: p.date,
            close: p.close,
        })
        .collect())
}

/// Fetch every ticker concurrently and align them on their common dates.
///
/// Tickers that fail are reported in `dropped`, never as an error, unless all
/// of them fail because of rate limiting.
pub async fn fetch_aligned_history(
    provider: &dyn PriceProvider,
    tickers: &[String],
    days: u32,
    failure_cache: &FailureCache,
) -> Result<AlignedHistory, AppError> {
    let results = join_all(
        tickers
            .iter()
            .map(|ticker| fetch_points(provider, failure_cache, ticker, days)),
    )
    .await;

    let mut fetched = Vec::new();
    let mut dropped = Vec::new();
    let mut rate_limited = 0;

    for (ticker, result) in tickers.iter().zip(results) {
        match result {
            Ok(points) => fetched.push((ticker.clone(), points)),
            Err(e) => {
                if matches!(e, PriceProviderError::RateLimited) {
                    rate_limited += 1;
                }
                dropped.push(ticker.clone());
            }
        }
    }

    if fetched.is_empty() && rate_limited > 0 && rate_limited == tickers.len() {
        return Err(AppError::RateLimited);
    }

    let aligned = align_on_common_dates(fetched, dropped);
    info!(
        "Aligned {} tickers on {} common dates ({} dropped)",
        aligned.series.len(),
        aligned.dates.len(),
        aligned.dropped.len()
    );
    Ok(aligned)
}

/// Keep only the dates present in every series, ascending. Disjoint calendars
/// leave every series empty.
pub fn align_on_common_dates(
    fetched: Vec<(String, Vec<ExternalPricePoint>)>,
    dropped: Vec<String>,
) -> AlignedHistory {
    let mut common: Option<BTreeSet<NaiveDate>> = None;
    for (_, points) in &fetched {
        let dates: BTreeSet<NaiveDate> = points.iter().map(|p| p.date).collect();
        common = Some(match common {
            None => dates,
            Some(acc) => acc.intersection(&dates).copied().collect(),
        });
    }
    let dates: Vec<NaiveDate> = common.unwrap_or_default().into_iter().collect();

    let series = fetched
        .into_iter()
        .map(|(ticker, points)| {
            let by_date: HashMap<NaiveDate, f64> = points.into_iter().map(|p| (p.date, p.close)).collect();
            let closes = dates
                .iter()
                .filter_map(|d| by_date.get(d).copied())
                .collect();
            AssetSeries::new(ticker, closes)
        })
        .collect();

    AlignedHistory {
        series,
        dates,
        dropped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn points(days: &[u32], base: f64) -> Vec<ExternalPricePoint> {
        days.iter()
            .map(|d| ExternalPricePoint {
                date: day(*d),
                close: base + *d as f64,
            })
            .collect()
    }

    struct FakeProvider {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PriceProvider for FakeProvider {
        fn name(&self) -> &str {
            "fake"
        }

        async fn fetch_daily_history(
            &self,
            ticker: &str,
            _days: u32,
        ) -> Result<Vec<ExternalPricePoint>, PriceProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match ticker {
                "AAA" => Ok(points(&[4, 5, 6, 7, 8], 100.0)),
                "BBB" => Ok(points(&[5, 6, 7, 8, 11], 50.0)),
                "SLOW" => Err(PriceProviderError::RateLimited),
                "EMPTY" => Ok(Vec::new()),
                other => Err(PriceProviderError::NotFound(other.to_string())),
            }
        }
    }

    fn provider() -> (FakeProvider, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (FakeProvider { calls: Arc::clone(&calls) }, calls)
    }

    #[test]
    fn test_normalize_tickers() {
        let raw = vec![
            " tcs.ns ".to_string(),
            "INFY.NS".to_string(),
            "TCS.NS".to_string(),
            "".to_string(),
            "  ".to_string(),
        ];
        assert_eq!(normalize_tickers(&raw), vec!["TCS.NS", "INFY.NS"]);
    }

    #[test]
    fn test_alignment_uses_date_intersection() {
        let aligned = align_on_common_dates(
            vec![
                ("AAA".to_string(), points(&[4, 5, 6, 7], 100.0)),
                ("BBB".to_string(), points(&[5, 6, 7, 8], 50.0)),
            ],
            Vec::new(),
        );
        assert_eq!(aligned.dates, vec![day(5), day(6), day(7)]);
        assert_eq!(aligned.series[0].closes, vec![105.0, 106.0, 107.0]);
        assert_eq!(aligned.series[1].closes, vec![55.0, 56.0, 57.0]);
    }

    #[tokio::test]
    async fn test_fetch_aligned_history_drops_failures() {
        let (provider, _) = provider();
        let cache = FailureCache::new();
        let tickers = vec!["AAA".to_string(), "BBB".to_string(), "NOPE".to_string(), "EMPTY".to_string()];

        let aligned = fetch_aligned_history(&provider, &tickers, 10, &cache).await.unwrap();
        assert_eq!(aligned.series.len(), 2);
        assert_eq!(aligned.dates.len(), 4);
        assert_eq!(aligned.dropped, vec!["NOPE", "EMPTY"]);
        assert!(cache.is_failed("NOPE").is_some());
        assert!(cache.is_failed("AAA").is_none());
    }

    #[tokio::test]
    async fn test_failure_cache_short_circuits_fetch() {
        let (provider, calls) = provider();
        let cache = FailureCache::new();

        assert!(fetch_history(&provider, &cache, "NOPE", 10).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let err = fetch_history(&provider, &cache, "NOPE", 10).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_rate_limited_is_an_error() {
        let (provider, _) = provider();
        let cache = FailureCache::new();
        let tickers = vec!["SLOW".to_string()];

        let err = fetch_aligned_history(&provider, &tickers, 10, &cache).await.unwrap_err();
        assert!(matches!(err, AppError::RateLimited));
    }

    #[tokio::test]
    async fn test_fetch_history_maps_points() {
        let (provider, _) = provider();
        let history = fetch_history(&provider, &FailureCache::new(), "AAA", 10).await.unwrap();
        assert_eq!(history.len(), 5);
        assert_eq!(history[0], PricePoint { date: day(4), close: 104.0 });
    }
}
