mod price_point;
pub mod risk;
pub mod optimization;

pub use price_point::{AssetSeries, PricePoint};
pub use risk::{AssetMetrics, CorrelationInsights, CorrelationPair, PortfolioMetrics};
pub use optimization::{
    AssetHighlight, AssetInsights, InputSummary, OptimizeRequest, OptimizeResponse,
    PortfolioStrategy, Portfolios, Recommendation, RecommendationType, StrategyComparison,
    StrategyInsights, StrategyKey, TopHolding,
};
