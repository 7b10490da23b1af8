use crate::external::price_provider::{ExternalPricePoint, PriceProvider, PriceProviderError};
use async_trait::async_trait;
use tracing::{info, warn};

/// Tries each provider in order and returns the first non-empty history.
///
/// The error of the last provider is returned when every one of them fails.
pub struct MultiProvider {
    providers: Vec<Box<dyn PriceProvider>>,
}

impl MultiProvider {
    pub fn new(providers: Vec<Box<dyn PriceProvider>>) -> Self {
        Self { providers }
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[async_trait]
impl PriceProvider for MultiProvider {
    fn name(&self) -> &str {
        "multi"
    }

    async fn fetch_daily_history(
        &self,
        ticker: &str,
        days: u32,
    ) -> Result<Vec<ExternalPricePoint>, PriceProviderError> {
        let mut last_error =
            PriceProviderError::BadResponse("no price providers configured".to_string());

        for provider in &self.providers {
            match provider.fetch_daily_history(ticker, days).await {
                Ok(data) if !data.is_empty() => {
                    info!("✓ Fetched {} bars for {} from {}", data.len(), ticker, provider.name());
                    return Ok(data);
                }
                Ok(_) => {
                    warn!("{} returned no data for {}, trying next provider", provider.name(), ticker);
                    last_error = PriceProviderError::NotFound(ticker.to_string());
                }
                Err(PriceProviderError::RateLimited) => {
                    info!("⚠️ {} rate limited for {}, trying next provider", provider.name(), ticker);
                    last_error = PriceProviderError::RateLimited;
                }
                Err(e) => {
                    warn!("{} failed for {}: {}", provider.name(), ticker, e);
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    enum Behavior {
        Fail,
        RateLimit,
        Empty,
        Succeed(f64),
    }

    struct FakeProvider {
        label: &'static str,
        behavior: Behavior,
        calls: Arc<AtomicUsize>,
    }

    impl FakeProvider {
        fn boxed(label: &'static str, behavior: Behavior, calls: &Arc<AtomicUsize>) -> Box<dyn PriceProvider> {
            Box::new(Self {
                label,
                behavior,
                calls: Arc::clone(calls),
            })
        }
    }

    #[async_trait]
    impl PriceProvider for FakeProvider {
        fn name(&self) -> &str {
            self.label
        }

        async fn fetch_daily_history(
            &self,
            _ticker: &str,
            _days: u32,
        ) -> Result<Vec<ExternalPricePoint>, PriceProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Fail => Err(PriceProviderError::Network("down".into())),
                Behavior::RateLimit => Err(PriceProviderError::RateLimited),
                Behavior::Empty => Ok(Vec::new()),
                Behavior::Succeed(close) => Ok(vec![ExternalPricePoint {
                    date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                    close,
                }]),
            }
        }
    }

    #[tokio::test]
    async fn test_falls_through_to_first_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let multi = MultiProvider::new(vec![
            FakeProvider::boxed("primary", Behavior::Fail, &calls),
            FakeProvider::boxed("secondary", Behavior::Empty, &calls),
            FakeProvider::boxed("tertiary", Behavior::Succeed(42.0), &calls),
            FakeProvider::boxed("never", Behavior::Succeed(1.0), &calls),
        ]);

        let points = multi.fetch_daily_history("AAPL", 10).await.unwrap();
        assert_eq!(points[0].close, 42.0);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_returns_last_error_when_all_fail() {
        let calls = Arc::new(AtomicUsize::new(0));
        let multi = MultiProvider::new(vec![
            FakeProvider::boxed("primary", Behavior::Fail, &calls),
            FakeProvider::boxed("secondary", Behavior::RateLimit, &calls),
        ]);

        let err = multi.fetch_daily_history("AAPL", 10).await.unwrap_err();
        assert!(matches!(err, PriceProviderError::RateLimited));
    }

    #[tokio::test]
    async fn test_empty_chain_is_an_error() {
        let multi = MultiProvider::new(Vec::new());
        assert!(multi.is_empty());
        assert!(multi.fetch_daily_history("AAPL", 10).await.is_err());
    }
}
