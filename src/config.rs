use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// Which upstream history source the service reads prices from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderChoice {
    Backend,
    AlphaVantage,
    Mock,
    Multi,
}

impl FromStr for ProviderChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "backend" | "yfinance" => Ok(ProviderChoice::Backend),
            "alphavantage" => Ok(ProviderChoice::AlphaVantage),
            "mock" => Ok(ProviderChoice::Mock),
            "multi" => Ok(ProviderChoice::Multi),
            other => Err(format!(
                "Invalid PRICE_PROVIDER: {}. Must be 'backend', 'alphavantage', 'mock', or 'multi'",
                other
            )),
        }
    }
}

/// Service configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub backend_url: String,
    pub alphavantage_api_key: Option<String>,
    pub price_provider: ProviderChoice,
    pub enable_mock_fallback: bool,
    pub risk_free_rate: f64,
    pub lookback_days: u32,
    pub request_timeout: Duration,
    pub optimization_cache_ttl_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            backend_url: "http://localhost:3001".to_string(),
            alphavantage_api_key: None,
            price_provider: ProviderChoice::Multi,
            enable_mock_fallback: true,
            risk_free_rate: 0.02,
            lookback_days: 504,
            request_timeout: Duration::from_secs(20),
            optimization_cache_ttl_secs: 900,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, String> {
        let defaults = Self::default();

        let price_provider = match std::env::var("PRICE_PROVIDER") {
            Ok(value) => value.parse::<ProviderChoice>()?,
            Err(_) => defaults.price_provider,
        };

        let config = Self {
            port: env_or("PORT", defaults.port),
            backend_url: std::env::var("BACKEND_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.backend_url),
            alphavantage_api_key: std::env::var("ALPHAVANTAGE_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
            price_provider,
            enable_mock_fallback: env_or("ENABLE_MOCK_FALLBACK", defaults.enable_mock_fallback),
            risk_free_rate: env_or("RISK_FREE_RATE", defaults.risk_free_rate),
            lookback_days: env_or("LOOKBACK_DAYS", defaults.lookback_days),
            request_timeout: Duration::from_secs(env_or(
                "REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )),
            optimization_cache_ttl_secs: env_or(
                "OPTIMIZATION_CACHE_TTL_SECS",
                defaults.optimization_cache_ttl_secs,
            ),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.risk_free_rate.is_finite() {
            return Err("RISK_FREE_RATE must be a finite number".to_string());
        }
        if self.lookback_days < 2 {
            return Err("LOOKBACK_DAYS must be at least 2".to_string());
        }
        if self.price_provider == ProviderChoice::AlphaVantage && self.alphavantage_api_key.is_none() {
            return Err("PRICE_PROVIDER is alphavantage but ALPHAVANTAGE_API_KEY is not set".to_string());
        }
        Ok(())
    }
}

fn env_or<T: FromStr + Copy>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring invalid value for {}: {:?}", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}
