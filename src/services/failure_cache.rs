use std::sync::Arc;
use chrono::{DateTime, Utc, Duration};
use dashmap::DashMap;

use crate::external::price_provider::PriceProviderError;

/// A failed history fetch for a ticker
#[derive(Debug, Clone)]
pub struct FailureInfo {
    pub failed_at: DateTime<Utc>,
    pub error_type: FailureType,
    pub ttl_hours: i64,
}

impl FailureInfo {
    pub fn retry_after(&self) -> DateTime<Utc> {
        self.failed_at + Duration::hours(self.ttl_hours)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FailureType {
    NotFound,       // Ticker unknown to every provider
    RateLimited,    // Temporary throttling
    ApiError,       // Network, parse and other upstream errors
}

impl FailureType {
    fn ttl_hours(self) -> i64 {
        match self {
            FailureType::NotFound => 24,
            FailureType::RateLimited => 1,
            FailureType::ApiError => 6,
        }
    }
}

impl From<&PriceProviderError> for FailureType {
    fn from(value: &PriceProviderError) -> Self {
        match value {
            PriceProviderError::NotFound(_) => FailureType::NotFound,
            PriceProviderError::RateLimited => FailureType::RateLimited,
            _ => FailureType::ApiError,
        }
    }
}

/// Thread-safe record of tickers whose history fetch recently failed, so
/// repeated optimizer requests don't hammer providers for known-bad symbols.
#[derive(Clone, Default)]
pub struct FailureCache {
    cache: Arc<DashMap<String, FailureInfo>>,
}

impl FailureCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The active failure for `ticker`, if its TTL has not elapsed
    pub fn is_failed(&self, ticker: &str) -> Option<FailureInfo> {
        if let Some(entry) = self.cache.get(ticker) {
            let info = entry.value().clone();
            if Utc::now() < info.retry_after() {
                return Some(info);
            }
            drop(entry); // Release the read lock before removing
            self.cache.remove(ticker);
        }
        None
    }

    pub fn record_failure(&self, ticker: &str, error_type: FailureType) {
        self.record_failure_at(ticker, error_type, Utc::now());
    }

    fn record_failure_at(&self, ticker: &str, error_type: FailureType, failed_at: DateTime<Utc>) {
        let info = FailureInfo {
            failed_at,
            error_type,
            ttl_hours: error_type.ttl_hours(),
        };
        self.cache.insert(ticker.to_string(), info);
    }

    pub fn clear(&self, ticker: &str) {
        self.cache.remove(ticker);
    }

    pub fn cleanup_expired(&self) {
        let now = Utc::now();
        self.cache.retain(|_, info| now < info.retry_after());
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
