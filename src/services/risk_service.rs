use std::collections::{BTreeMap, HashSet};

use ndarray::{Array1, Array2};
use tracing::{debug, warn};

use crate::errors::AppError;
use crate::models::{AssetMetrics, AssetSeries, PortfolioMetrics};

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Below this magnitude a variance, volatility or denominator is treated as zero.
pub(crate) const EPSILON: f64 = 1e-12;

/// Left tail used for historical VaR/CVaR (95% confidence).
const VAR_TAIL: f64 = 0.05;

/// Upper bound reported for the diversification ratio of a fully hedged portfolio.
const DIVERSIFICATION_RATIO_CAP: f64 = 1_000.0;

/// Daily returns and annualized moments for the set of assets being analyzed.
///
/// Column `j` of every matrix corresponds to `symbols[j]`.
#[derive(Debug, Clone)]
pub struct ReturnStatistics {
    pub symbols: Vec<String>,
    /// Symbols rejected for short or invalid history
    pub excluded: Vec<String>,
    /// Number of aligned closes per asset
    pub trading_days: usize,
    /// Daily simple returns, shape `(trading_days - 1, assets)`
    pub returns: Array2<f64>,
    pub mean_returns: Array1<f64>,
    pub volatilities: Array1<f64>,
    pub covariance: Array2<f64>,
    pub correlation: Array2<f64>,
}

impl ReturnStatistics {
    pub fn asset_count(&self) -> usize {
        self.symbols.len()
    }
}

/// Risk profile of one weight vector.
#[derive(Debug, Clone)]
pub struct PortfolioEvaluation {
    pub metrics: PortfolioMetrics,
    pub risk_contribution: Array1<f64>,
}

/// Build return, covariance and correlation statistics from aligned close series.
///
/// Series with fewer than two closes or with non-finite/non-positive prices are
/// excluded. Fails with `InsufficientData` when fewer than two symbols remain.
pub fn compute_return_statistics(series: &[AssetSeries]) -> Result<ReturnStatistics, AppError> {
    let mut seen = HashSet::new();
    let mut usable: Vec<&AssetSeries> = Vec::new();
    let mut excluded = Vec::new();

    for s in series {
        if !seen.insert(s.symbol.as_str()) {
            warn!("Ignoring duplicate series for {}", s.symbol);
            continue;
        }
        if s.is_usable() {
            usable.push(s);
        } else {
            warn!(
                "Excluding {} from analysis: needs at least 2 finite, positive closes (got {})",
                s.symbol,
                s.closes.len()
            );
            excluded.push(s.symbol.clone());
        }
    }

    if usable.len() < 2 {
        return Err(AppError::InsufficientData(format!(
            "need at least 2 symbols with valid price history, found {}",
            usable.len()
        )));
    }

    // Ragged inputs are aligned on their most recent closes
    let trading_days = usable.iter().map(|s| s.closes.len()).min().unwrap_or(0);
    let assets = usable.len();
    let mut returns = Array2::<f64>::zeros((trading_days - 1, assets));

    for (col, s) in usable.iter().enumerate() {
        let tail = &s.closes[s.closes.len() - trading_days..];
        for (row, r) in simple_returns(tail).into_iter().enumerate() {
            returns[[row, col]] = r;
        }
    }

    let mean_returns = Array1::from_iter(
        (0..assets).map(|j| returns.column(j).mean().unwrap_or(0.0) * TRADING_DAYS_PER_YEAR),
    );
    let covariance = covariance_matrix(&returns);
    let volatilities = Array1::from_iter((0..assets).map(|i| covariance[[i, i]].max(0.0).sqrt()));
    let correlation = correlation_matrix(&covariance);

    debug!(
        "Return statistics ready: {} assets, {} trading days, {} excluded",
        assets,
        trading_days,
        excluded.len()
    );

    Ok(ReturnStatistics {
        symbols: usable.iter().map(|s| s.symbol.clone()).collect(),
        excluded,
        trading_days,
        returns,
        mean_returns,
        volatilities,
        covariance,
        correlation,
    })
}

/// Simple daily returns of a close series.
pub fn simple_returns(closes: &[f64]) -> Vec<f64> {
    closes.windows(2).map(|w| (w[1] - w[0]) / w[0]).collect()
}

/// Annualized sample covariance of the columns of a daily return matrix.
pub fn covariance_matrix(returns: &Array2<f64>) -> Array2<f64> {
    let (days, assets) = returns.dim();
    let means: Vec<f64> = (0..assets)
        .map(|j| returns.column(j).mean().unwrap_or(0.0))
        .collect();
    let denominator = days.saturating_sub(1).max(1) as f64;

    let mut cov = Array2::<f64>::zeros((assets, assets));
    for i in 0..assets {
        for j in i..assets {
            let mut acc = 0.0;
            for row in 0..days {
                acc += (returns[[row, i]] - means[i]) * (returns[[row, j]] - means[j]);
            }
            let value = acc / denominator * TRADING_DAYS_PER_YEAR;
            cov[[i, j]] = value;
            cov[[j, i]] = value;
        }
    }
    cov
}

/// Normalize a covariance matrix into correlations. Pairs involving a
/// zero-volatility asset get correlation 0.
pub fn correlation_matrix(cov: &Array2<f64>) -> Array2<f64> {
    let n = cov.nrows();
    let std_devs: Vec<f64> = (0..n).map(|i| cov[[i, i]].max(0.0).sqrt()).collect();

    Array2::from_shape_fn((n, n), |(i, j)| {
        if i == j {
            return 1.0;
        }
        let denominator = std_devs[i] * std_devs[j];
        if denominator < EPSILON {
            0.0
        } else {
            (cov[[i, j]] / denominator).clamp(-1.0, 1.0)
        }
    })
}

/// Division that reports 0 instead of propagating NaN or infinity.
pub fn safe_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator.abs() < EPSILON || !numerator.is_finite() || !denominator.is_finite() {
        return 0.0;
    }
    let value = numerator / denominator;
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

pub fn sharpe_ratio(annual_return: f64, volatility: f64, risk_free_rate: f64) -> f64 {
    safe_ratio(annual_return - risk_free_rate, volatility)
}

/// Per-asset annualized return, volatility and Sharpe ratio.
pub fn asset_metrics(stats: &ReturnStatistics, risk_free_rate: f64) -> BTreeMap<String, AssetMetrics> {
    stats
        .symbols
        .iter()
        .enumerate()
        .map(|(i, symbol)| {
            let annual_return = stats.mean_returns[i];
            let volatility = stats.volatilities[i];
            (
                symbol.clone(),
                AssetMetrics {
                    annual_return,
                    volatility,
                    sharpe: sharpe_ratio(annual_return, volatility, risk_free_rate),
                },
            )
        })
        .collect()
}

/// `wᵀΣw`, floored at zero to absorb rounding on near-singular matrices.
pub fn portfolio_variance(cov: &Array2<f64>, weights: &Array1<f64>) -> f64 {
    weights.dot(&cov.dot(weights)).max(0.0)
}

/// Largest peak-to-trough decline of the equity curve obtained by compounding
/// `daily_returns` from 1.0. Returned as a non-positive fraction.
pub fn max_drawdown(daily_returns: &[f64]) -> f64 {
    let mut equity = 1.0;
    let mut peak = 1.0;
    let mut max_dd = 0.0;

    for r in daily_returns {
        equity *= 1.0 + r;
        if equity > peak {
            peak = equity;
        }
        if peak > 0.0 {
            let dd = (equity - peak) / peak;
            if dd < max_dd {
                max_dd = dd;
            }
        }
    }

    max_dd
}

/// Historical 95% VaR: the daily return at rank `floor(0.05 × n)` of the
/// ascending distribution.
pub fn historical_var(daily_returns: &[f64]) -> f64 {
    if daily_returns.is_empty() {
        return 0.0;
    }
    let mut sorted = daily_returns.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let idx = ((sorted.len() as f64 * VAR_TAIL).floor() as usize).min(sorted.len() - 1);
    sorted[idx]
}

/// Expected shortfall: mean of the daily returns at or below `var`.
pub fn conditional_var(daily_returns: &[f64], var: f64) -> f64 {
    let tail: Vec<f64> = daily_returns.iter().copied().filter(|r| *r <= var).collect();
    if tail.is_empty() {
        return var;
    }
    tail.iter().sum::<f64>() / tail.len() as f64
}

/// Weighted average asset volatility over portfolio volatility.
pub fn diversification_ratio(
    weights: &Array1<f64>,
    volatilities: &Array1<f64>,
    portfolio_volatility: f64,
) -> f64 {
    let weighted_volatility = weights.dot(volatilities);
    if weighted_volatility < EPSILON {
        return 1.0;
    }
    // A perfect hedge has zero portfolio volatility; report the cap instead of infinity
    (weighted_volatility / portfolio_volatility).min(DIVERSIFICATION_RATIO_CAP)
}

/// Inverse Herfindahl index `1 / Σ wᵢ²`.
pub fn effective_assets(weights: &Array1<f64>) -> f64 {
    let hhi = weights.dot(weights);
    if hhi < EPSILON {
        0.0
    } else {
        1.0 / hhi
    }
}

/// Fraction of portfolio variance attributable to each asset,
/// `wᵢ (Σw)ᵢ / wᵀΣw`. A riskless portfolio attributes risk by weight.
pub fn risk_contributions(cov: &Array2<f64>, weights: &Array1<f64>) -> Array1<f64> {
    let marginal = cov.dot(weights);
    let contributions = weights * &marginal;
    let total = contributions.sum();

    if total.abs() < EPSILON {
        let weight_sum = weights.sum();
        if weight_sum.abs() < EPSILON {
            return Array1::zeros(weights.len());
        }
        return weights / weight_sum;
    }
    contributions / total
}

/// Compute the full metric set for `weights` against the historical returns.
pub fn evaluate_portfolio(
    stats: &ReturnStatistics,
    weights: &Array1<f64>,
    risk_free_rate: f64,
) -> PortfolioEvaluation {
    let daily = stats.returns.dot(weights).to_vec();

    let annual_return = stats.mean_returns.dot(weights);
    let volatility = portfolio_variance(&stats.covariance, weights).sqrt();
    let var_95 = historical_var(&daily);
    let cvar_95 = conditional_var(&daily, var_95);

    let metrics = PortfolioMetrics {
        annual_return,
        volatility,
        sharpe: sharpe_ratio(annual_return, volatility, risk_free_rate),
        max_drawdown: max_drawdown(&daily),
        var_95,
        cvar_95,
        diversification_ratio: diversification_ratio(weights, &stats.volatilities, volatility),
        effective_assets: effective_assets(weights),
    };

    PortfolioEvaluation {
        metrics,
        risk_contribution: risk_contributions(&stats.covariance, weights),
    }
}
