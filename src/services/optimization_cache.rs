use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::models::OptimizeResponse;

const MAX_TTL_SECS: u64 = 7 * 24 * 3600;

struct CachedOptimization {
    response: Arc<OptimizeResponse>,
    expires_at: DateTime<Utc>,
}

/// Short-lived cache of optimizer responses keyed by ticker set and capital.
///
/// A TTL of zero disables caching.
#[derive(Clone)]
pub struct OptimizationCache {
    entries: Arc<DashMap<String, CachedOptimization>>,
    ttl: Duration,
}

impl OptimizationCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl: Duration::seconds(ttl_secs.min(MAX_TTL_SECS) as i64),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.ttl > Duration::zero()
    }

    /// Tickers in request order plus the exact bits of `capital`.
    ///
    /// Responses list tickers in request order, so reordered requests get their own entry.
    pub fn cache_key(tickers: &[String], capital: f64) -> String {
        format!("{}|{:016x}", tickers.join(","), capital.to_bits())
    }

    pub fn get(&self, key: &str) -> Option<Arc<OptimizeResponse>> {
        if !self.is_enabled() {
            return None;
        }
        let entry = self.entries.get(key)?;
        if Utc::now() < entry.expires_at {
            debug!("Optimization cache hit for {}", key);
            return Some(Arc::clone(&entry.response));
        }
        drop(entry);
        self.entries.remove(key);
        None
    }

    pub fn insert(&self, key: String, response: Arc<OptimizeResponse>) {
        if !self.is_enabled() {
            return;
        }
        let expires_at = Utc::now() + self.ttl;
        self.entries.insert(key, CachedOptimization { response, expires_at });

        // Drop anything that expired since the last insert
        let now = Utc::now();
        self.entries.retain(|_, cached| now < cached.expires_at);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AssetSeries;
    use crate::services::optimization_service::{optimize, OptimizerSettings};

    fn response() -> Arc<OptimizeResponse> {
        let series = vec![
            AssetSeries::new("A", vec![100.0, 101.0, 99.5, 102.0, 103.0]),
            AssetSeries::new("B", vec![50.0, 49.0, 50.5, 51.0, 50.0]),
        ];
        Arc::new(optimize(&series, 1_000.0, &OptimizerSettings::default()).unwrap())
    }

    #[test]
    fn test_key_follows_ticker_order_and_capital() {
        let a = OptimizationCache::cache_key(&["MSFT".into(), "AAPL".into()], 1000.0);
        let b = OptimizationCache::cache_key(&["AAPL".into(), "MSFT".into()], 1000.0);
        let c = OptimizationCache::cache_key(&["AAPL".into(), "MSFT".into()], 1000.5);
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_eq!(a, OptimizationCache::cache_key(&["MSFT".into(), "AAPL".into()], 1000.0));
    }

    #[test]
    fn test_insert_and_get() {
        let cache = OptimizationCache::new(60);
        cache.insert("k".to_string(), response());
        assert!(cache.get("k").is_some());
        assert!(cache.get("other").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_zero_ttl_disables_cache() {
        let cache = OptimizationCache::new(0);
        cache.insert("k".to_string(), response());
        assert!(cache.is_empty());
        assert!(cache.get("k").is_none());
    }
}
