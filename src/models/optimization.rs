use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::risk::{AssetMetrics, CorrelationInsights, PortfolioMetrics};

/// Body of `POST /api/optimize`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OptimizeRequest {
    pub tickers: Vec<String>,
    pub capital: f64,
}

/// The four allocation strategies the optimizer produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKey {
    MinRisk,
    MaxSharpe,
    Hrp,
    Kelly,
}

impl StrategyKey {
    pub const ALL: [StrategyKey; 4] = [
        StrategyKey::MinRisk,
        StrategyKey::MaxSharpe,
        StrategyKey::Hrp,
        StrategyKey::Kelly,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            StrategyKey::MinRisk => "Minimum Risk",
            StrategyKey::MaxSharpe => "Max Sharpe",
            StrategyKey::Hrp => "HRP",
            StrategyKey::Kelly => "Half Kelly",
        }
    }
}

/// Echo of what was actually analyzed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSummary {
    pub valid_tickers_found: Vec<String>,
    pub capital: f64,
    /// Number of aligned daily closes in the analysis window
    pub trading_days_analyzed: usize,
    /// Requested symbols that had no usable history
    #[serde(default)]
    pub dropped_tickers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopHolding {
    pub ticker: String,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyInsights {
    pub is_concentrated: bool,
    pub top_holding: TopHolding,
}

/// One allocation strategy: weights, capital split and the resulting risk profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioStrategy {
    pub weights: BTreeMap<String, f64>,
    pub allocation: BTreeMap<String, f64>,
    pub metrics: PortfolioMetrics,
    /// Share of total portfolio variance attributable to each asset
    pub risk_contribution: BTreeMap<String, f64>,
    pub insights: StrategyInsights,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolios {
    pub min_risk: PortfolioStrategy,
    pub max_sharpe: PortfolioStrategy,
    pub hrp: PortfolioStrategy,
    pub kelly: PortfolioStrategy,
}

impl Portfolios {
    pub fn get(&self, key: StrategyKey) -> &PortfolioStrategy {
        match key {
            StrategyKey::MinRisk => &self.min_risk,
            StrategyKey::MaxSharpe => &self.max_sharpe,
            StrategyKey::Hrp => &self.hrp,
            StrategyKey::Kelly => &self.kelly,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (StrategyKey, &PortfolioStrategy)> {
        StrategyKey::ALL.into_iter().map(move |key| (key, self.get(key)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetHighlight {
    pub ticker: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetInsights {
    pub best_return: AssetHighlight,
    pub best_sharpe: AssetHighlight,
    pub lowest_volatility: AssetHighlight,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyComparison {
    pub best_sharpe: StrategyKey,
    pub lowest_risk: StrategyKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationType {
    Strategy,
    Warning,
    Positive,
    Insight,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    #[serde(rename = "type")]
    pub kind: RecommendationType,
    pub title: String,
    pub description: String,
}

/// Complete optimizer output consumed by the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizeResponse {
    pub input: InputSummary,
    pub assets: BTreeMap<String, AssetMetrics>,
    pub portfolios: Portfolios,
    pub asset_insights: AssetInsights,
    pub correlation_insights: CorrelationInsights,
    pub strategy_comparison: StrategyComparison,
    pub recommendations: Vec<Recommendation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_key_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&StrategyKey::MinRisk).unwrap(), "\"min_risk\"");
        assert_eq!(serde_json::to_string(&StrategyKey::MaxSharpe).unwrap(), "\"max_sharpe\"");
    }

    #[test]
    fn test_recommendation_type_field_name() {
        let rec = Recommendation {
            kind: RecommendationType::Warning,
            title: "t".to_string(),
            description: "d".to_string(),
        };
        let value = serde_json::to_value(&rec).unwrap();
        assert_eq!(value["type"], "warning");
    }

    #[test]
    fn test_request_deserializes() {
        let req: OptimizeRequest =
            serde_json::from_str(r#"{"tickers":["TCS.NS","INFY.NS"],"capital":100000}"#).unwrap();
        assert_eq!(req.tickers.len(), 2);
        assert_eq!(req.capital, 100000.0);
    }
}
