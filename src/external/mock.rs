use crate::external::price_provider::{ExternalPricePoint, PriceProvider, PriceProviderError};
use async_trait::async_trait;
use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, Utc, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Deterministic synthetic prices for offline use and as the last fallback.
///
/// Each ticker gets its own geometric random walk seeded from its symbol, so
/// repeated requests see the same history.
pub struct MockProvider;

impl MockProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

// FNV-1a, stable across builds unlike DefaultHasher
fn ticker_seed(ticker: &str) -> u64 {
    ticker
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325_u64, |hash, b| {
            (hash ^ u64::from(b)).wrapping_mul(0x0000_0100_0000_01b3)
        })
}

/// The `count` most recent weekdays up to and including `end`, ascending.
fn weekdays_ending(end: NaiveDate, count: usize) -> Vec<NaiveDate> {
    let mut dates = Vec::with_capacity(count);
    let mut day = end;
    while dates.len() < count {
        if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            dates.push(day);
        }
        day -= ChronoDuration::days(1);
    }
    dates.reverse();
    dates
}

/// Synthetic walk for `ticker` over the `days` weekdays ending at `end`.
pub fn generate_series(ticker: &str, days: u32, end: NaiveDate) -> Vec<ExternalPricePoint> {
    let mut rng = StdRng::seed_from_u64(ticker_seed(ticker));

    let drift = -0.0002 + rng.random::<f64>() * 0.001;
    let volatility = 0.008 + rng.random::<f64>() * 0.017;
    let mut close = 20.0 + rng.random::<f64>() * 480.0;

    weekdays_ending(end, days as usize)
        .into_iter()
        .map(|date| {
            // Box-Muller, u1 in (0, 1]
            let u1 = 1.0 - rng.random::<f64>();
            let u2 = rng.random::<f64>();
            let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();

            close *= (drift + volatility * z).exp();
            ExternalPricePoint {
                date,
                close: (close * 100.0).round() / 100.0,
            }
        })
        .collect()
}

#[async_trait]
impl PriceProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_daily_history(
        &self,
        ticker: &str,
        days: u32,
    ) -> Result<Vec<ExternalPricePoint>, PriceProviderError> {
        if ticker.trim().is_empty() {
            return Err(PriceProviderError::NotFound(ticker.to_string()));
        }
        Ok(generate_series(ticker, days, Utc::now().date_naive()))
    }
}
