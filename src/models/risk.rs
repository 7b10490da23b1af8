use serde::{Deserialize, Serialize};

/// Annualized statistics for a single asset over the analysis window.
///
/// Values are fractions (0.12 for 12%), not percentages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetMetrics {
    /// Mean daily return × 252
    #[serde(rename = "return")]
    pub annual_return: f64,

    /// Sample standard deviation of daily returns × √252
    pub volatility: f64,

    /// (return − risk-free rate) / volatility, 0 when volatility is 0
    pub sharpe: f64,
}

/// Risk and return figures for a weighted portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioMetrics {
    #[serde(rename = "return")]
    pub annual_return: f64,
    pub volatility: f64,
    pub sharpe: f64,

    /// Largest peak-to-trough decline of the compounded equity curve, as a
    /// non-positive fraction
    pub max_drawdown: f64,

    /// 5th percentile of historical daily portfolio returns
    pub var_95: f64,

    /// Mean of the daily returns at or below `var_95`
    pub cvar_95: f64,

    pub diversification_ratio: f64,

    /// Inverse Herfindahl index of the weights
    pub effective_assets: f64,
}

/// Correlation between two symbols.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationPair {
    pub pair: [String; 2],
    pub correlation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationInsights {
    pub avg_correlation: f64,
    pub least_correlated: Vec<CorrelationPair>,
    pub most_correlated: Vec<CorrelationPair>,
}
