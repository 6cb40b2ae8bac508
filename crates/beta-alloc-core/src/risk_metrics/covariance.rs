use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::AllocationError;
use crate::market_data::returns::ReturnTable;
use crate::types::AssetId;
use crate::AllocationResult;

/// Sample covariance matrix over an asset universe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovarianceMatrix {
    pub assets: Vec<AssetId>,
    /// N x N, row-major, symmetric.
    pub values: Vec<Vec<Decimal>>,
}

impl CovarianceMatrix {
    pub fn dim(&self) -> usize {
        self.assets.len()
    }

    pub fn get(&self, i: usize, j: usize) -> Decimal {
        self.values[i][j]
    }

    /// Per-asset standard deviations (square roots of the diagonal).
    pub fn volatilities(&self) -> Vec<Decimal> {
        use rust_decimal::MathematicalOps;
        (0..self.dim())
            .map(|i| self.values[i][i].max(Decimal::ZERO).sqrt().unwrap_or(Decimal::ZERO))
            .collect()
    }
}

/// Sample mean of a series. Callers guarantee a non-empty slice.
pub(crate) fn mean(xs: &[Decimal]) -> Decimal {
    xs.iter().sum::<Decimal>() / Decimal::from(xs.len() as i64)
}

/// Unbiased sample covariance (n - 1 denominator) of two equal-length series.
pub(crate) fn sample_covariance(a: &[Decimal], b: &[Decimal]) -> Decimal {
    let n = a.len();
    let mean_a = mean(a);
    let mean_b = mean(b);
    let cross: Decimal = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x - mean_a) * (*y - mean_b))
        .sum();
    cross / Decimal::from((n - 1) as i64)
}

/// Estimate the covariance matrix of every column in `table`.
///
/// Only the upper triangle is computed; the lower triangle is mirrored so the
/// result is exactly symmetric.
#[allow(clippy::needless_range_loop)]
pub fn estimate_covariance(table: &ReturnTable) -> AllocationResult<CovarianceMatrix> {
    let n_obs = table.len();
    if n_obs < 2 {
        return Err(AllocationError::InsufficientData(format!(
            "At least 2 aligned return periods required for covariance, got {}",
            n_obs
        )));
    }
    if table.assets.is_empty() {
        return Err(AllocationError::InsufficientData(
            "At least one asset required for covariance".into(),
        ));
    }

    let n = table.assets.len();
    let mut values = vec![vec![Decimal::ZERO; n]; n];
    for i in 0..n {
        for j in i..n {
            let c = sample_covariance(&table.returns[i], &table.returns[j]);
            values[i][j] = c;
            values[j][i] = c;
        }
    }

    Ok(CovarianceMatrix {
        assets: table.assets.clone(),
        values,
    })
}
