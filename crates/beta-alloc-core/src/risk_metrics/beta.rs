use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::AllocationError;
use crate::types::AssetId;
use crate::AllocationResult;

use super::covariance::{mean, sample_covariance};

/// Per-asset market betas, in the same asset order as the covariance matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetaVector {
    pub assets: Vec<AssetId>,
    pub betas: Vec<Decimal>,
}

impl BetaVector {
    pub fn len(&self) -> usize {
        self.betas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.betas.is_empty()
    }

    /// Smallest and largest beta; the target-beta range reachable by a
    /// long-only fully-invested portfolio.
    pub fn range(&self) -> Option<(Decimal, Decimal)> {
        let first = *self.betas.first()?;
        Some(
            self.betas
                .iter()
                .fold((first, first), |(lo, hi), b| (lo.min(*b), hi.max(*b))),
        )
    }
}

/// Simple regression of one asset on the benchmark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionFit {
    pub asset: AssetId,
    /// Intercept (per-period alpha).
    pub alpha: Decimal,
    /// Slope on the benchmark return.
    pub beta: Decimal,
    /// Coefficient of determination.
    pub r_squared: Decimal,
    pub observations: usize,
}

/// OLS slope of `asset_returns` on `benchmark_returns`, with intercept.
///
/// Closed form: `beta = cov(a, m) / var(m)`, both with the n - 1 denominator
/// (which cancels). Fails with `InsufficientData` when fewer than two
/// observations are supplied or the benchmark is constant over the window.
pub fn estimate_beta(
    asset_returns: &[Decimal],
    benchmark_returns: &[Decimal],
) -> AllocationResult<Decimal> {
    check_series(asset_returns, benchmark_returns)?;

    let var_m = sample_covariance(benchmark_returns, benchmark_returns);
    if var_m.is_zero() {
        return Err(AllocationError::InsufficientData(format!(
            "Benchmark returns have zero variance over {} periods; beta is undefined",
            benchmark_returns.len()
        )));
    }
    Ok(sample_covariance(asset_returns, benchmark_returns) / var_m)
}

/// Full simple-regression fit: slope, intercept and R-squared.
pub fn fit_regression(
    asset: &str,
    asset_returns: &[Decimal],
    benchmark_returns: &[Decimal],
) -> AllocationResult<RegressionFit> {
    let beta = estimate_beta(asset_returns, benchmark_returns)?;
    let alpha = mean(asset_returns) - beta * mean(benchmark_returns);

    let var_a = sample_covariance(asset_returns, asset_returns);
    let var_m = sample_covariance(benchmark_returns, benchmark_returns);
    let r_squared = if var_a.is_zero() {
        Decimal::ONE
    } else {
        (beta * beta * var_m / var_a).min(Decimal::ONE)
    };

    Ok(RegressionFit {
        asset: asset.to_string(),
        alpha,
        beta,
        r_squared,
        observations: asset_returns.len(),
    })
}

/// R-squared below which a fit is flagged as weakly explained by the market.
pub(crate) const LOW_R_SQUARED: Decimal = dec!(0.1);

fn check_series(asset_returns: &[Decimal], benchmark_returns: &[Decimal]) -> AllocationResult<()> {
    if asset_returns.len() != benchmark_returns.len() {
        return Err(AllocationError::InvalidInput {
            field: "asset_returns".into(),
            reason: format!(
                "Asset series length ({}) does not match benchmark length ({})",
                asset_returns.len(),
                benchmark_returns.len()
            ),
        });
    }
    if asset_returns.len() < 2 {
        return Err(AllocationError::InsufficientData(format!(
            "At least 2 aligned return periods required for beta, got {}",
            asset_returns.len()
        )));
    }
    Ok(())
}
