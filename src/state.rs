use std::sync::Arc;

use crate::config::AppConfig;
use crate::external::price_provider::PriceProvider;
use crate::services::failure_cache::FailureCache;
use crate::services::optimization_cache::OptimizationCache;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub price_provider: Arc<dyn PriceProvider>,
    pub failure_cache: FailureCache,
    pub optimization_cache: OptimizationCache,
}

impl AppState {
    pub fn new(config: AppConfig, price_provider: Arc<dyn PriceProvider>) -> Self {
        let optimization_cache = OptimizationCache::new(config.optimization_cache_ttl_secs);
        Self {
            config: Arc::new(config),
            price_provider,
            failure_cache: FailureCache::new(),
            optimization_cache,
        }
    }
}
