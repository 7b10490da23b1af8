use ndarray::{Array1, Array2};
use tracing::{debug, warn};

use crate::services::clustering::quasi_diagonal_order;
use crate::services::risk_service::{portfolio_variance, safe_ratio, EPSILON};

/// Iteration cap and step tolerance for the iterative solvers.
#[derive(Debug, Clone, Copy)]
pub struct SolverLimits {
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for SolverLimits {
    fn default() -> Self {
        Self {
            max_iterations: 20_000,
            tolerance: 1e-8,
        }
    }
}

const MIN_STEP: f64 = 1e-12;
const MAX_STEP: f64 = 10.0;
const RIDGE_ATTEMPTS: usize = 8;
/// Relative variance decrease over the last tenth of the iterations below
/// which a capped min-variance run counts as stalled at its optimum.
const STALL_TOLERANCE: f64 = 1e-6;

pub fn equal_weights(n: usize) -> Array1<f64> {
    if n == 0 {
        return Array1::zeros(0);
    }
    Array1::from_elem(n, 1.0 / n as f64)
}

/// Clip negative or non-finite weights to zero and rescale to sum to 1.
/// Falls back to equal weights when nothing positive is left.
pub fn finalize_weights(raw: &Array1<f64>) -> Array1<f64> {
    let clipped = raw.mapv(|w| if w.is_finite() && w > 0.0 { w } else { 0.0 });
    let total = clipped.sum();
    if total < EPSILON {
        return equal_weights(raw.len());
    }
    clipped / total
}

/// Euclidean projection onto the probability simplex `{w ≥ 0, Σw = 1}`.
pub fn project_to_simplex(v: &Array1<f64>) -> Array1<f64> {
    let n = v.len();
    if n == 0 {
        return Array1::zeros(0);
    }

    let mut sorted = v.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));

    let mut cumulative = 0.0;
    let mut theta = 0.0;
    for (j, u) in sorted.iter().enumerate() {
        cumulative += u;
        let candidate = (cumulative - 1.0) / (j + 1) as f64;
        if u - candidate > 0.0 {
            theta = candidate;
        }
    }

    v.mapv(|x| (x - theta).max(0.0))
}

/// `w_i ∝ 1/σ_i²`, with zero variances floored at `EPSILON`.
pub fn inverse_variance_weights(cov: &Array2<f64>) -> Array1<f64> {
    let raw = Array1::from_iter((0..cov.nrows()).map(|i| 1.0 / cov[[i, i]].max(EPSILON)));
    finalize_weights(&raw)
}

/// Long-only minimum-variance weights.
///
/// Accelerated projected gradient on `wᵀΣw` over the simplex. Falls back to
/// inverse-variance weights only when the variance is still falling at the
/// iteration cap.
pub fn min_risk_weights(cov: &Array2<f64>, limits: SolverLimits) -> Array1<f64> {
    let n = cov.nrows();
    match minimize_variance(cov, limits) {
        Some((weights, iterations)) => {
            debug!("min_risk converged after {} iterations", iterations);
            finalize_weights(&weights)
        }
        None => {
            warn!(
                "min_risk did not converge in {} iterations for {} assets, using inverse-variance weights",
                limits.max_iterations, n
            );
            inverse_variance_weights(cov)
        }
    }
}

fn minimize_variance(cov: &Array2<f64>, limits: SolverLimits) -> Option<(Array1<f64>, usize)> {
    let n = cov.nrows();
    let mut w = equal_weights(n);

    // Gershgorin bound on the largest eigenvalue of the gradient operator 2Σ
    let lipschitz = 2.0
        * (0..n)
            .map(|i| (0..n).map(|j| cov[[i, j]].abs()).sum::<f64>())
            .fold(0.0, f64::max);
    if lipschitz < EPSILON {
        // Every feasible point has zero variance
        return Some((w, 0));
    }
    let step = 1.0 / lipschitz;

    let mut y = w.clone();
    let mut momentum = 1.0_f64;
    let mut objective = portfolio_variance(cov, &w);

    // Accepted iterates never increase the variance, so `w` is always the best seen
    let checkpoint = limits.max_iterations - limits.max_iterations / 10;
    let mut checkpoint_objective = f64::INFINITY;

    for iteration in 1..=limits.max_iterations {
        if iteration == checkpoint {
            checkpoint_objective = objective;
        }

        let gradient = cov.dot(&y) * 2.0;
        let next = project_to_simplex(&(&y - &(gradient * step)));
        let next_objective = portfolio_variance(cov, &next);

        let delta = (&next - &w).mapv(f64::abs).fold(0.0, |acc: f64, x| acc.max(*x));

        if next_objective > objective {
            // Restart acceleration when the objective goes up
            momentum = 1.0;
            y = w.clone();
            if delta < limits.tolerance {
                return Some((w, iteration));
            }
            continue;
        }

        let next_momentum = (1.0 + (1.0 + 4.0 * momentum * momentum).sqrt()) / 2.0;
        y = &next + &((&next - &w) * ((momentum - 1.0) / next_momentum));
        momentum = next_momentum;
        w = next;
        objective = next_objective;

        if delta < limits.tolerance {
            return Some((w, iteration));
        }
    }

    let recent_decrease = checkpoint_objective - objective;
    if recent_decrease <= STALL_TOLERANCE * objective.abs().max(EPSILON) {
        debug!(
            "min_risk stalled at variance {:.6e} after {} iterations, keeping the best iterate",
            objective, limits.max_iterations
        );
        return Some((w, limits.max_iterations));
    }

    None
}

fn portfolio_sharpe(mean: &Array1<f64>, cov: &Array2<f64>, w: &Array1<f64>, risk_free_rate: f64) -> f64 {
    safe_ratio(mean.dot(w) - risk_free_rate, portfolio_variance(cov, w).sqrt())
}

/// Gradient of the Sharpe ratio; `None` where volatility vanishes.
fn sharpe_gradient(
    mean: &Array1<f64>,
    cov: &Array2<f64>,
    w: &Array1<f64>,
    risk_free_rate: f64,
) -> Option<Array1<f64>> {
    let sigma = portfolio_variance(cov, w).sqrt();
    if sigma < EPSILON {
        return None;
    }
    let excess = mean.dot(w) - risk_free_rate;
    let gradient = mean / sigma - cov.dot(w) * (excess / sigma.powi(3));
    if gradient.iter().all(|g| g.is_finite()) {
        Some(gradient)
    } else {
        None
    }
}

/// Long-only maximum-Sharpe weights.
///
/// Projected gradient ascent with an adaptive step. Returns equal weights when
/// no asset beats the risk-free rate, when all expected returns are equal, or
/// when the iteration cap is reached.
pub fn max_sharpe_weights(
    mean: &Array1<f64>,
    cov: &Array2<f64>,
    risk_free_rate: f64,
    limits: SolverLimits,
) -> Array1<f64> {
    let n = mean.len();

    if mean.iter().all(|m| m - risk_free_rate <= EPSILON) {
        warn!("max_sharpe infeasible: no asset beats the risk-free rate, using equal weights");
        return equal_weights(n);
    }

    let first = mean[0];
    if mean.iter().all(|m| (m - first).abs() <= EPSILON) {
        debug!("max_sharpe: all expected returns equal, using equal weights");
        return equal_weights(n);
    }

    let mut w = equal_weights(n);
    let mut sharpe = portfolio_sharpe(mean, cov, &w, risk_free_rate);
    let mut step = 0.5;

    for iteration in 1..=limits.max_iterations {
        let Some(gradient) = sharpe_gradient(mean, cov, &w, risk_free_rate) else {
            debug!("max_sharpe stopped at a zero-volatility point after {} iterations", iteration);
            return finalize_weights(&w);
        };

        let mut accepted: Option<f64> = None;
        while step >= MIN_STEP {
            let candidate = project_to_simplex(&(&w + &(&gradient * step)));
            let candidate_sharpe = portfolio_sharpe(mean, cov, &candidate, risk_free_rate);

            if candidate_sharpe > sharpe {
                let delta = (&candidate - &w).mapv(f64::abs).fold(0.0, |acc: f64, x| acc.max(*x));
                w = candidate;
                sharpe = candidate_sharpe;
                step = (step * 2.0).min(MAX_STEP);
                accepted = Some(delta);
                break;
            }
            step *= 0.5;
        }

        match accepted {
            Some(delta) if delta >= limits.tolerance => {}
            _ => {
                debug!("max_sharpe converged after {} iterations (sharpe {:.4})", iteration, sharpe);
                return finalize_weights(&w);
            }
        }
    }

    warn!(
        "max_sharpe did not converge in {} iterations, using equal weights",
        limits.max_iterations
    );
    equal_weights(n)
}

/// Hierarchical Risk Parity weights.
///
/// Orders assets by the single-linkage dendrogram of correlation distances, then
/// splits capital top-down between the two halves of each bisection in inverse
/// proportion to their inverse-variance cluster variance.
pub fn hrp_weights(cov: &Array2<f64>, correlation: &Array2<f64>) -> Array1<f64> {
    let n = cov.nrows();
    let order = quasi_diagonal_order(correlation);
    if order.len() != n {
        return finalize_weights(&Array1::zeros(n));
    }

    let mut weights = Array1::<f64>::ones(n);
    let mut pending: Vec<Vec<usize>> = vec![order];

    while let Some(cluster) = pending.pop() {
        if cluster.len() < 2 {
            continue;
        }
        let (left, right) = cluster.split_at(cluster.len() / 2);
        let left_variance = cluster_variance(cov, left);
        let right_variance = cluster_variance(cov, right);

        let total = left_variance + right_variance;
        let alpha = if total < EPSILON {
            0.5
        } else {
            1.0 - left_variance / total
        };

        for &i in left {
            weights[i] *= alpha;
        }
        for &i in right {
            weights[i] *= 1.0 - alpha;
        }

        pending.push(left.to_vec());
        pending.push(right.to_vec());
    }

    finalize_weights(&weights)
}

/// Variance of the inverse-variance portfolio over `members`.
fn cluster_variance(cov: &Array2<f64>, members: &[usize]) -> f64 {
    let inverse: Vec<f64> = members.iter().map(|&i| 1.0 / cov[[i, i]].max(EPSILON)).collect();
    let total: f64 = inverse.iter().sum();

    let mut variance = 0.0;
    for (a, &i) in members.iter().enumerate() {
        for (b, &j) in members.iter().enumerate() {
            variance += (inverse[a] / total) * (inverse[b] / total) * cov[[i, j]];
        }
    }
    variance.max(0.0)
}

/// Fractional Kelly weights `fraction · Σ⁻¹μ`, long-only and renormalized.
///
/// A singular covariance is ridge-regularized before solving.
pub fn kelly_weights(mean: &Array1<f64>, cov: &Array2<f64>, fraction: f64) -> Array1<f64> {
    let n = mean.len();
    let Some(full_kelly) = solve_regularized(cov, mean) else {
        warn!("Kelly: covariance could not be inverted even with regularization, using equal weights");
        return equal_weights(n);
    };

    let scaled = full_kelly * fraction;
    if scaled.iter().all(|w| !w.is_finite() || *w <= 0.0) {
        warn!("Kelly: no asset has a positive Kelly weight, using equal weights");
    }
    finalize_weights(&scaled)
}

/// Solve `(Σ + λI) x = b`, starting with `λ = 0` and increasing the ridge
/// until the system is well conditioned.
pub fn solve_regularized(cov: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    if let Some(x) = solve_linear(cov, b) {
        return Some(x);
    }

    let n = cov.nrows().max(1);
    let scale = ((0..cov.nrows()).map(|i| cov[[i, i]].abs()).sum::<f64>() / n as f64).max(EPSILON);
    let mut ridge = scale * 1e-6;

    for _ in 0..RIDGE_ATTEMPTS {
        let mut regularized = cov.clone();
        for i in 0..cov.nrows() {
            regularized[[i, i]] += ridge;
        }
        if let Some(x) = solve_linear(&regularized, b) {
            debug!("Solved covariance system with ridge {:.3e}", ridge);
            return Some(x);
        }
        ridge *= 10.0;
    }
    None
}

/// Gaussian elimination with partial pivoting. Returns `None` for singular or
/// near-singular systems.
pub fn solve_linear(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    if n == 0 || a.ncols() != n || b.len() != n {
        return None;
    }

    let scale = a.iter().fold(0.0_f64, |acc, x| acc.max(x.abs()));
    if scale < EPSILON {
        return None;
    }
    let pivot_floor = scale * 1e-10;

    let mut m = a.clone();
    let mut rhs = b.clone();

    for col in 0..n {
        let pivot_row = (col..n)
            .max_by(|&i, &j| m[[i, col]].abs().total_cmp(&m[[j, col]].abs()))
            .unwrap_or(col);
        if m[[pivot_row, col]].abs() < pivot_floor {
            return None;
        }

        if pivot_row != col {
            for k in 0..n {
                m.swap([col, k], [pivot_row, k]);
            }
            rhs.swap(col, pivot_row);
        }

        for row in (col + 1)..n {
            let factor = m[[row, col]] / m[[col, col]];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                m[[row, k]] -= factor * m[[col, k]];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = Array1::<f64>::zeros(n);
    for row in (0..n).rev() {
        let mut acc = rhs[row];
        for k in (row + 1)..n {
            acc -= m[[row, k]] * x[k];
        }
        x[row] = acc / m[[row, row]];
    }

    if x.iter().all(|v| v.is_finite()) {
        Some(x)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    fn assert_simplex(w: &Array1<f64>) {
        assert!((w.sum() - 1.0).abs() < 1e-6, "weights sum to {}", w.sum());
        assert!(w.iter().all(|x| *x >= 0.0 && *x <= 1.0));
    }

    #[test]
    fn test_projection_onto_simplex() {
        let p = project_to_simplex(&arr1(&[0.5, 0.5, 0.5]));
        assert_simplex(&p);
        assert!((p[0] - 1.0 / 3.0).abs() < 1e-12);

        let p = project_to_simplex(&arr1(&[2.0, -1.0]));
        assert_eq!(p, arr1(&[1.0, 0.0]));
    }

    #[test]
    fn test_finalize_clips_and_renormalizes() {
        let w = finalize_weights(&arr1(&[0.6, -0.2, 0.2, f64::NAN]));
        assert_simplex(&w);
        assert_eq!(w[1], 0.0);
        assert_eq!(w[3], 0.0);
        assert!((w[0] - 0.75).abs() < 1e-12);

        let w = finalize_weights(&arr1(&[-1.0, -2.0]));
        assert_eq!(w, arr1(&[0.5, 0.5]));
    }

    #[test]
    fn test_min_risk_two_uncorrelated_assets() {
        // Optimal split is proportional to inverse variance: 0.09 / (0.04 + 0.09)
        let cov = arr2(&[[0.04, 0.0], [0.0, 0.09]]);
        let w = min_risk_weights(&cov, SolverLimits::default());
        assert_simplex(&w);
        assert!((w[0] - 0.09 / 0.13).abs() < 1e-6);
    }

    #[test]
    fn test_min_risk_perfect_hedge() {
        let cov = arr2(&[[0.04, -0.04], [-0.04, 0.04]]);
        let w = min_risk_weights(&cov, SolverLimits::default());
        assert!(portfolio_variance(&cov, &w) < 1e-12);
    }

    #[test]
    fn test_min_risk_falls_back_without_iterations() {
        let cov = arr2(&[[0.04, 0.01], [0.01, 0.09]]);
        let limits = SolverLimits {
            max_iterations: 0,
            tolerance: 1e-8,
        };
        let w = min_risk_weights(&cov, limits);
        assert_eq!(w, inverse_variance_weights(&cov));
    }

    /// One-factor covariance `ββᵀσ_m² + diag(s²)` for `n` assets.
    fn factor_covariance(n: usize) -> Array2<f64> {
        let market = 0.03;
        let beta: Vec<f64> = (0..n).map(|i| 0.4 + 1.2 * ((i * 7) % n) as f64 / n as f64).collect();
        let specific: Vec<f64> = (0..n).map(|i| 0.01 + 0.05 * ((i * 3) % n) as f64 / n as f64).collect();
        Array2::from_shape_fn((n, n), |(i, j)| {
            let common = beta[i] * beta[j] * market;
            if i == j {
                common + specific[i]
            } else {
                common
            }
        })
    }

    #[test]
    fn test_min_risk_beats_heuristics_on_factor_universe() {
        for n in [10, 20, 25] {
            let cov = factor_covariance(n);
            let limits = SolverLimits::default();
            let (solved, _) = minimize_variance(&cov, limits).expect("solver settles");
            let w = min_risk_weights(&cov, limits);
            assert_simplex(&w);
            assert_ne!(w, inverse_variance_weights(&cov), "n = {}", n);

            let variance = portfolio_variance(&cov, &w);
            assert!((variance - portfolio_variance(&cov, &solved)).abs() < 1e-12);
            assert!(variance <= portfolio_variance(&cov, &inverse_variance_weights(&cov)) + 1e-12);
            assert!(variance <= portfolio_variance(&cov, &equal_weights(n)) + 1e-12);
        }
    }

    #[test]
    fn test_min_risk_keeps_stalled_iterate() {
        let cov = factor_covariance(12);
        let limits = SolverLimits {
            max_iterations: 20_000,
            tolerance: 0.0,
        };
        let w = min_risk_weights(&cov, limits);
        assert_ne!(w, inverse_variance_weights(&cov));
        let reference = min_risk_weights(&cov, SolverLimits::default());
        assert!((portfolio_variance(&cov, &w) - portfolio_variance(&cov, &reference)).abs() < 1e-9);
    }

    #[test]
    fn test_max_sharpe_prefers_better_asset() {
        let mean = arr1(&[0.20, 0.05]);
        let cov = arr2(&[[0.04, 0.0], [0.0, 0.04]]);
        let w = max_sharpe_weights(&mean, &cov, 0.0, SolverLimits::default());
        assert_simplex(&w);
        // Tangency portfolio for uncorrelated assets: w ∝ μ/σ² -> 0.8 / 0.2
        assert!((w[0] - 0.8).abs() < 1e-4, "w = {:?}", w);
    }

    #[test]
    fn test_max_sharpe_infeasible_returns_equal_weights() {
        let mean = arr1(&[-0.1, -0.05, 0.0]);
        let cov = arr2(&[[0.04, 0.0, 0.0], [0.0, 0.04, 0.0], [0.0, 0.0, 0.04]]);
        let w = max_sharpe_weights(&mean, &cov, 0.02, SolverLimits::default());
        assert_eq!(w, equal_weights(3));
    }

    #[test]
    fn test_hrp_favors_low_variance_asset() {
        let cov = arr2(&[[0.01, 0.0], [0.0, 0.04]]);
        let corr = arr2(&[[1.0, 0.0], [0.0, 1.0]]);
        let w = hrp_weights(&cov, &corr);
        assert_simplex(&w);
        assert!((w[0] - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_hrp_is_deterministic() {
        let cov = arr2(&[[0.04, 0.01, 0.0], [0.01, 0.09, 0.02], [0.0, 0.02, 0.16]]);
        let corr = arr2(&[[1.0, 0.1667, 0.0], [0.1667, 1.0, 0.1667], [0.0, 0.1667, 1.0]]);
        assert_eq!(hrp_weights(&cov, &corr), hrp_weights(&cov, &corr));
    }

    #[test]
    fn test_kelly_long_only() {
        let mean = arr1(&[0.10, -0.05]);
        let cov = arr2(&[[0.04, 0.0], [0.0, 0.04]]);
        let w = kelly_weights(&mean, &cov, 0.5);
        assert_eq!(w, arr1(&[1.0, 0.0]));
    }

    #[test]
    fn test_kelly_singular_covariance_is_regularized() {
        let mean = arr1(&[0.1, 0.1]);
        let cov = arr2(&[[0.04, 0.04], [0.04, 0.04]]);
        assert!(solve_linear(&cov, &mean).is_none());
        let w = kelly_weights(&mean, &cov, 0.5);
        assert_simplex(&w);
        assert!((w[0] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_solve_linear() {
        let a = arr2(&[[2.0, 1.0], [1.0, 3.0]]);
        let b = arr1(&[3.0, 5.0]);
        let x = solve_linear(&a, &b).unwrap();
        assert!((x[0] - 0.8).abs() < 1e-12);
        assert!((x[1] - 1.4).abs() < 1e-12);
    }
}
