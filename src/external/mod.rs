pub mod alphavantage;
pub mod backend_history;
pub mod mock;
pub mod multi_provider;
pub mod price_provider;

use std::sync::Arc;

use tracing::info;

use crate::config::{AppConfig, ProviderChoice};
use alphavantage::AlphaVantageProvider;
use backend_history::BackendHistoryProvider;
use mock::MockProvider;
use multi_provider::MultiProvider;
use price_provider::{PriceProvider, PriceProviderError};

/// Build the provider selected by `PRICE_PROVIDER`.
///
/// `multi` chains the history backend, then Alpha Vantage when a key is set,
/// then the mock generator when mock fallback is enabled.
pub fn build_price_provider(config: &AppConfig) -> Result<Arc<dyn PriceProvider>, PriceProviderError> {
    let provider: Arc<dyn PriceProvider> = match config.price_provider {
        ProviderChoice::Backend => {
            info!("📊 Using price provider: history backend at {}", config.backend_url);
            Arc::new(BackendHistoryProvider::new(&config.backend_url, config.request_timeout)?)
        }
        ProviderChoice::AlphaVantage => {
            info!("📊 Using price provider: Alpha Vantage only");
            let key = config.alphavantage_api_key.as_deref().ok_or_else(|| {
                PriceProviderError::BadResponse("ALPHAVANTAGE_API_KEY not set".into())
            })?;
            Arc::new(AlphaVantageProvider::new(key, config.request_timeout)?)
        }
        ProviderChoice::Mock => {
            info!("📊 Using price provider: synthetic mock data");
            Arc::new(MockProvider::new())
        }
        ProviderChoice::Multi => {
            let mut chain: Vec<Box<dyn PriceProvider>> = vec![Box::new(BackendHistoryProvider::new(
                &config.backend_url,
                config.request_timeout,
            )?)];
            if let Some(key) = config.alphavantage_api_key.as_deref() {
                chain.push(Box::new(AlphaVantageProvider::new(key, config.request_timeout)?));
            }
            if config.enable_mock_fallback {
                chain.push(Box::new(MockProvider::new()));
            }

            let names: Vec<&str> = chain.iter().map(|p| p.name()).collect();
            info!("📊 Using price provider: multi ({})", names.join(" -> "));
            Arc::new(MultiProvider::new(chain))
        }
    };
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builds_every_choice() {
        for choice in [ProviderChoice::Backend, ProviderChoice::Mock, ProviderChoice::Multi] {
            let config = AppConfig {
                price_provider: choice,
                ..AppConfig::default()
            };
            assert!(build_price_provider(&config).is_ok());
        }
    }

    #[test]
    fn test_alphavantage_without_key_fails() {
        let config = AppConfig {
            price_provider: ProviderChoice::AlphaVantage,
            ..AppConfig::default()
        };
        assert!(build_price_provider(&config).is_err());
    }

    #[test]
    fn test_multi_reports_its_name() {
        let provider = build_price_provider(&AppConfig::default()).unwrap();
        assert_eq!(provider.name(), "multi");
    }
}
