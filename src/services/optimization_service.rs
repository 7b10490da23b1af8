use std::collections::BTreeMap;

use ndarray::Array1;
use tracing::{debug, info};

use crate::errors::AppError;
use crate::models::{
    AssetHighlight, AssetInsights, AssetMetrics, AssetSeries, CorrelationInsights, CorrelationPair,
    InputSummary, OptimizeResponse, PortfolioStrategy, Portfolios, Recommendation,
    RecommendationType, StrategyComparison, StrategyInsights, StrategyKey, TopHolding,
};
use crate::services::allocation_service::{
    hrp_weights, kelly_weights, max_sharpe_weights, min_risk_weights, SolverLimits,
};
use crate::services::risk_service::{asset_metrics, compute_return_statistics, evaluate_portfolio, ReturnStatistics};

/// Thresholds behind the qualitative recommendations.
const CONCENTRATION_TOP_WEIGHT: f64 = 0.6;
const CONCENTRATION_EFFECTIVE_FRACTION: f64 = 0.5;
const HIGH_AVG_CORRELATION: f64 = 0.7;
const LOW_AVG_CORRELATION: f64 = 0.3;
const LIMITED_DIVERSIFICATION_RATIO: f64 = 1.2;
const SEVERE_DRAWDOWN: f64 = -0.30;
const REDUNDANT_PAIR_CORRELATION: f64 = 0.85;

/// Tunables for one optimization run.
#[derive(Debug, Clone)]
pub struct OptimizerSettings {
    pub risk_free_rate: f64,
    /// Length of the least/most correlated pair lists
    pub top_pairs: usize,
    pub kelly_fraction: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        let limits = SolverLimits::default();
        Self {
            risk_free_rate: 0.02,
            top_pairs: 3,
            kelly_fraction: 0.5,
            max_iterations: limits.max_iterations,
            tolerance: limits.tolerance,
        }
    }
}

impl OptimizerSettings {
    pub fn with_risk_free_rate(risk_free_rate: f64) -> Self {
        Self {
            risk_free_rate,
            ..Self::default()
        }
    }

    fn solver_limits(&self) -> SolverLimits {
        SolverLimits {
            max_iterations: self.max_iterations,
            tolerance: self.tolerance,
        }
    }
}

/// Run the full analysis over aligned close series.
///
/// Pure and synchronous; callers on an async runtime should move it to a
/// blocking thread.
pub fn optimize(
    series: &[AssetSeries],
    capital: f64,
    settings: &OptimizerSettings,
) -> Result<OptimizeResponse, AppError> {
    if !capital.is_finite() || capital <= 0.0 {
        return Err(AppError::Validation(
            "capital must be a positive number".to_string(),
        ));
    }

    let stats = compute_return_statistics(series)?;
    let rf = settings.risk_free_rate;
    let limits = settings.solver_limits();

    info!(
        "Optimizing {} assets over {} trading days (capital {:.2})",
        stats.asset_count(),
        stats.trading_days,
        capital
    );

    let min_risk = min_risk_weights(&stats.covariance, limits);
    let max_sharpe = max_sharpe_weights(&stats.mean_returns, &stats.covariance, rf, limits);
    let hrp = hrp_weights(&stats.covariance, &stats.correlation);
    let kelly = kelly_weights(&stats.mean_returns, &stats.covariance, settings.kelly_fraction);

    let portfolios = Portfolios {
        min_risk: build_strategy(&stats, &min_risk, capital, rf),
        max_sharpe: build_strategy(&stats, &max_sharpe, capital, rf),
        hrp: build_strategy(&stats, &hrp, capital, rf),
        kelly: build_strategy(&stats, &kelly, capital, rf),
    };

    let assets = asset_metrics(&stats, rf);
    let asset_insights = asset_insights(&assets);
    let correlation_insights = correlation_insights(&stats, settings.top_pairs);
    let strategy_comparison = compare_strategies(&portfolios);
    let recommendations = build_recommendations(
        &stats,
        &assets,
        &portfolios,
        &correlation_insights,
        &strategy_comparison,
    );

    debug!(
        "Best Sharpe strategy: {:?}, lowest risk: {:?}, {} recommendations",
        strategy_comparison.best_sharpe,
        strategy_comparison.lowest_risk,
        recommendations.len()
    );

    Ok(OptimizeResponse {
        input: InputSummary {
            valid_tickers_found: stats.symbols.clone(),
            capital,
            trading_days_analyzed: stats.trading_days,
            dropped_tickers: stats.excluded.clone(),
        },
        assets,
        portfolios,
        asset_insights,
        correlation_insights,
        strategy_comparison,
        recommendations,
    })
}

fn to_symbol_map(symbols: &[String], values: &Array1<f64>) -> BTreeMap<String, f64> {
    symbols
        .iter()
        .zip(values.iter())
        .map(|(s, v)| (s.clone(), *v))
        .collect()
}

fn build_strategy(
    stats: &ReturnStatistics,
    weights: &Array1<f64>,
    capital: f64,
    risk_free_rate: f64,
) -> PortfolioStrategy {
    let evaluation = evaluate_portfolio(stats, weights, risk_free_rate);
    let weight_map = to_symbol_map(&stats.symbols, weights);
    let allocation = weight_map
        .iter()
        .map(|(symbol, w)| (symbol.clone(), w * capital))
        .collect();

    let top_holding = top_holding(&weight_map);
    let n = stats.asset_count() as f64;
    let is_concentrated = top_holding.weight > CONCENTRATION_TOP_WEIGHT
        || evaluation.metrics.effective_assets < CONCENTRATION_EFFECTIVE_FRACTION * n;

    PortfolioStrategy {
        weights: weight_map,
        allocation,
        metrics: evaluation.metrics,
        risk_contribution: to_symbol_map(&stats.symbols, &evaluation.risk_contribution),
        insights: StrategyInsights {
            is_concentrated,
            top_holding,
        },
    }
}

/// Largest weight; equal weights resolve to the alphabetically first symbol.
fn top_holding(weights: &BTreeMap<String, f64>) -> TopHolding {
    let mut best = TopHolding {
        ticker: String::new(),
        weight: f64::NEG_INFINITY,
    };
    for (symbol, w) in weights {
        if *w > best.weight {
            best = TopHolding {
                ticker: symbol.clone(),
                weight: *w,
            };
        }
    }
    if best.ticker.is_empty() {
        best.weight = 0.0;
    }
    best
}

/// First symbol (in symbol order) that strictly beats every earlier one under `better`.
fn pick_asset(
    assets: &BTreeMap<String, AssetMetrics>,
    value: impl Fn(&AssetMetrics) -> f64,
    better: impl Fn(f64, f64) -> bool,
) -> AssetHighlight {
    let mut best: Option<AssetHighlight> = None;
    for (symbol, metrics) in assets {
        let v = value(metrics);
        let replace = match &best {
            None => true,
            Some(current) => better(v, current.value),
        };
        if replace {
            best = Some(AssetHighlight {
                ticker: symbol.clone(),
                value: v,
            });
        }
    }
    best.unwrap_or(AssetHighlight {
        ticker: String::new(),
        value: 0.0,
    })
}

pub fn asset_insights(assets: &BTreeMap<String, AssetMetrics>) -> AssetInsights {
    AssetInsights {
        best_return: pick_asset(assets, |m| m.annual_return, |a, b| a > b),
        best_sharpe: pick_asset(assets, |m| m.sharpe, |a, b| a > b),
        lowest_volatility: pick_asset(assets, |m| m.volatility, |a, b| a < b),
    }
}

/// Average pairwise correlation plus the `top_k` least and most correlated pairs.
pub fn correlation_insights(stats: &ReturnStatistics, top_k: usize) -> CorrelationInsights {
    let n = stats.asset_count();
    let mut pairs = Vec::with_capacity(n * n.saturating_sub(1) / 2);

    for i in 0..n {
        for j in (i + 1)..n {
            let (a, b) = (&stats.symbols[i], &stats.symbols[j]);
            let pair = if a <= b {
                [a.clone(), b.clone()]
            } else {
                [b.clone(), a.clone()]
            };
            pairs.push(CorrelationPair {
                pair,
                correlation: stats.correlation[[i, j]],
            });
        }
    }

    let avg_correlation = if pairs.is_empty() {
        0.0
    } else {
        pairs.iter().map(|p| p.correlation).sum::<f64>() / pairs.len() as f64
    };

    let mut ascending = pairs.clone();
    ascending.sort_by(|x, y| {
        x.correlation
            .total_cmp(&y.correlation)
            .then_with(|| x.pair.cmp(&y.pair))
    });
    let mut descending = pairs;
    descending.sort_by(|x, y| {
        y.correlation
            .total_cmp(&x.correlation)
            .then_with(|| x.pair.cmp(&y.pair))
    });

    ascending.truncate(top_k);
    descending.truncate(top_k);

    CorrelationInsights {
        avg_correlation,
        least_correlated: ascending,
        most_correlated: descending,
    }
}

/// Highest Sharpe and lowest volatility; earlier strategies win ties.
pub fn compare_strategies(portfolios: &Portfolios) -> StrategyComparison {
    let mut best_sharpe = StrategyKey::MinRisk;
    let mut lowest_risk = StrategyKey::MinRisk;

    for (key, strategy) in portfolios.iter() {
        if strategy.metrics.sharpe > portfolios.get(best_sharpe).metrics.sharpe {
            best_sharpe = key;
        }
        if strategy.metrics.volatility < portfolios.get(lowest_risk).metrics.volatility {
            lowest_risk = key;
        }
    }

    StrategyComparison {
        best_sharpe,
        lowest_risk,
    }
}

fn recommendation(kind: RecommendationType, title: &str, description: String) -> Recommendation {
    Recommendation {
        kind,
        title: title.to_string(),
        description,
    }
}

fn percent(value: f64) -> String {
    format!("{:.1}%", value * 100.0)
}

pub fn build_recommendations(
    stats: &ReturnStatistics,
    assets: &BTreeMap<String, AssetMetrics>,
    portfolios: &Portfolios,
    correlation: &CorrelationInsights,
    comparison: &StrategyComparison,
) -> Vec<Recommendation> {
    let mut out = Vec::new();

    let best = portfolios.get(comparison.best_sharpe);
    out.push(recommendation(
        RecommendationType::Strategy,
        "Best risk-adjusted strategy",
        format!(
            "{} offers the highest Sharpe ratio ({:.2}) with {} expected annual return and {} volatility.",
            comparison.best_sharpe.display_name(),
            best.metrics.sharpe,
            percent(best.metrics.annual_return),
            percent(best.metrics.volatility)
        ),
    ));

    if comparison.lowest_risk != comparison.best_sharpe {
        let safest = portfolios.get(comparison.lowest_risk);
        out.push(recommendation(
            RecommendationType::Strategy,
            "Lowest risk option",
            format!(
                "{} has the lowest volatility at {}, with a maximum drawdown of {}.",
                comparison.lowest_risk.display_name(),
                percent(safest.metrics.volatility),
                percent(safest.metrics.max_drawdown)
            ),
        ));
    }

    if correlation.avg_correlation > HIGH_AVG_CORRELATION {
        out.push(recommendation(
            RecommendationType::Warning,
            "Highly correlated holdings",
            format!(
                "Average pairwise correlation is {:.2}. These assets tend to move together; consider adding holdings from other sectors or asset classes.",
                correlation.avg_correlation
            ),
        ));
    } else if correlation.avg_correlation < LOW_AVG_CORRELATION {
        out.push(recommendation(
            RecommendationType::Positive,
            "Good diversification across holdings",
            format!(
                "Average pairwise correlation is only {:.2}, so losses in one asset are often offset by others.",
                correlation.avg_correlation
            ),
        ));
    }

    if best.metrics.diversification_ratio < LIMITED_DIVERSIFICATION_RATIO {
        out.push(recommendation(
            RecommendationType::Insight,
            "Limited diversification benefit",
            format!(
                "The {} portfolio has a diversification ratio of {:.2}; combining these assets reduces risk only slightly.",
                comparison.best_sharpe.display_name(),
                best.metrics.diversification_ratio
            ),
        ));
    } else {
        out.push(recommendation(
            RecommendationType::Positive,
            "Meaningful diversification benefit",
            format!(
                "The {} portfolio has a diversification ratio of {:.2}, well above a single-asset position.",
                comparison.best_sharpe.display_name(),
                best.metrics.diversification_ratio
            ),
        ));
    }

    let n = stats.asset_count() as f64;
    if best.metrics.effective_assets < CONCENTRATION_EFFECTIVE_FRACTION * n {
        out.push(recommendation(
            RecommendationType::Warning,
            "Concentrated portfolio",
            format!(
                "The {} portfolio behaves like {:.1} assets out of {}; most capital sits in {} ({}).",
                comparison.best_sharpe.display_name(),
                best.metrics.effective_assets,
                stats.asset_count(),
                best.insights.top_holding.ticker,
                percent(best.insights.top_holding.weight)
            ),
        ));
    }

    let losers: Vec<&str> = assets
        .iter()
        .filter(|(_, m)| m.annual_return < 0.0)
        .map(|(symbol, _)| symbol.as_str())
        .collect();
    if !losers.is_empty() {
        out.push(recommendation(
            RecommendationType::Warning,
            "Negative historical returns",
            format!(
                "{} had negative annualized returns over the analysis window.",
                losers.join(", ")
            ),
        ));
    }

    if best.metrics.max_drawdown < SEVERE_DRAWDOWN {
        out.push(recommendation(
            RecommendationType::Warning,
            "Large historical drawdown",
            format!(
                "The {} portfolio fell {} from peak to trough during the analysis window.",
                comparison.best_sharpe.display_name(),
                percent(-best.metrics.max_drawdown)
            ),
        ));
    }

    if let Some(top) = correlation.most_correlated.first() {
        if top.correlation > REDUNDANT_PAIR_CORRELATION {
            out.push(recommendation(
                RecommendationType::Insight,
                "Overlapping positions",
                format!(
                    "{} and {} are {:.2} correlated; holding both adds little diversification.",
                    top.pair[0], top.pair[1], top.correlation
                ),
            ));
        }
    }

    out
}
