use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::error::AllocationError;
use crate::market_data::returns::ReturnTable;
use crate::types::{with_metadata, AssetId, ComputationOutput, EstimationWindow};
use crate::AllocationResult;

use super::beta::{fit_regression, BetaVector, RegressionFit, LOW_R_SQUARED};
use super::covariance::{estimate_covariance, CovarianceMatrix};

/// Observation count below which estimates are flagged as noisy.
const RECOMMENDED_OBSERVATIONS: usize = 30;

/// Input for risk estimation over a return table that includes the benchmark.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskMetricsInput {
    /// Aligned returns for the assets and the benchmark.
    pub returns: ReturnTable,
    /// Identifier of the benchmark column.
    pub benchmark: AssetId,
    /// Optional estimation window; the full table is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<EstimationWindow>,
}

/// Covariance and beta snapshot for one estimation window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskEstimate {
    /// Covariance over the non-benchmark assets.
    pub covariance: CovarianceMatrix,
    /// Beta of each non-benchmark asset against the benchmark.
    pub betas: BetaVector,
    /// Regression diagnostics per asset.
    pub fits: Vec<RegressionFit>,
    pub benchmark: AssetId,
    pub observations: usize,
}

/// Estimate the covariance matrix and benchmark betas for every
/// non-benchmark asset in the table.
pub fn estimate_risk_metrics(
    input: &RiskMetricsInput,
) -> AllocationResult<ComputationOutput<RiskEstimate>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    input.returns.validate()?;
    let table = match &input.window {
        Some(w) => input.returns.window(w)?,
        None => input.returns.clone(),
    };

    let benchmark_returns = table
        .column(&input.benchmark)
        .ok_or_else(|| AllocationError::InvalidInput {
            field: "benchmark".into(),
            reason: format!("Benchmark '{}' not found in return table", input.benchmark),
        })?;

    let assets: Vec<AssetId> = table
        .assets
        .iter()
        .filter(|a| **a != input.benchmark)
        .cloned()
        .collect();
    if assets.is_empty() {
        return Err(AllocationError::InsufficientData(
            "Return table contains no assets besides the benchmark".into(),
        ));
    }

    let universe = table.select(&assets)?;
    let covariance = estimate_covariance(&universe)?;

    let mut fits = Vec::with_capacity(assets.len());
    for (asset, column) in universe.assets.iter().zip(universe.returns.iter()) {
        fits.push(fit_regression(asset, column, benchmark_returns)?);
    }
    let betas = BetaVector {
        assets: assets.clone(),
        betas: fits.iter().map(|f| f.beta).collect(),
    };

    let n_obs = table.len();
    if n_obs < RECOMMENDED_OBSERVATIONS {
        warnings.push(format!(
            "Only {} observations; fewer than the recommended {} for stable estimates",
            n_obs, RECOMMENDED_OBSERVATIONS
        ));
    }
    for fit in &fits {
        if fit.r_squared < LOW_R_SQUARED {
            warnings.push(format!(
                "Low R-squared for {} ({:.4}); beta is weakly determined",
                fit.asset, fit.r_squared
            ));
        }
    }

    tracing::debug!(
        assets = assets.len(),
        observations = n_obs,
        benchmark = %input.benchmark,
        "estimated covariance and betas"
    );

    let output = RiskEstimate {
        covariance,
        betas,
        fits,
        benchmark: input.benchmark.clone(),
        observations: n_obs,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Sample Covariance (n-1) and OLS Benchmark Betas",
        &serde_json::json!({
            "n_assets": assets.len(),
            "observations": n_obs,
            "benchmark": input.benchmark,
            "window_start": table.periods.first().map(|d| d.to_string()),
            "window_end": table.periods.last().map(|d| d.to_string()),
        }),
        warnings,
        elapsed,
        output,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
    }

    fn sample_table() -> ReturnTable {
        let mkt = vec![dec!(0.01), dec!(-0.02), dec!(0.015), dec!(0.005), dec!(-0.01)];
        let a: Vec<Decimal> = mkt.iter().map(|r| *r * dec!(1.5)).collect();
        let b: Vec<Decimal> = mkt.iter().map(|r| *r * dec!(0.5)).collect();
        ReturnTable::from_columns(
            vec!["AAA".into(), "BBB".into(), "MKT".into()],
            (1..=5).map(d).collect(),
            vec![a, b, mkt],
        )
        .unwrap()
    }

    #[test]
    fn test_benchmark_excluded_from_universe() {
        let input = RiskMetricsInput {
            returns: sample_table(),
            benchmark: "MKT".into(),
            window: None,
        };
        let out = estimate_risk_metrics(&input).unwrap();
        let est = &out.result;
        assert_eq!(est.covariance.assets, vec!["AAA".to_string(), "BBB".to_string()]);
        assert_eq!(est.betas.assets, est.covariance.assets);
        assert!((est.betas.betas[0] - dec!(1.5)).abs() < dec!(0.0000001));
        assert!((est.betas.betas[1] - dec!(0.5)).abs() < dec!(0.0000001));
        assert_eq!(est.observations, 5);
        // Short sample is flagged.
        assert!(out.warnings.iter().any(|w| w.contains("observations")));
    }

    #[test]
    fn test_window_shrinks_observations() {
        let input = RiskMetricsInput {
            returns: sample_table(),
            benchmark: "MKT".into(),
            window: Some(EstimationWindow::new(Some(d(2)), Some(d(4)))),
        };
        let out = estimate_risk_metrics(&input).unwrap();
        assert_eq!(out.result.observations, 3);
    }

    #[test]
    fn test_window_too_short_is_insufficient() {
        let input = RiskMetricsInput {
            returns: sample_table(),
            benchmark: "MKT".into(),
            window: Some(EstimationWindow::new(Some(d(5)), None)),
        };
        let err = estimate_risk_metrics(&input).unwrap_err();
        assert_eq!(err.kind(), "InsufficientDataError");
    }

    #[test]
    fn test_unknown_benchmark() {
        let input = RiskMetricsInput {
            returns: sample_table(),
            benchmark: "SPX".into(),
            window: None,
        };
        let err = estimate_risk_metrics(&input).unwrap_err();
        assert!(err.to_string().contains("SPX"));
    }

    #[test]
    fn test_benchmark_only_table() {
        let t = sample_table().select(&["MKT".to_string()]).unwrap();
        let input = RiskMetricsInput {
            returns: t,
            benchmark: "MKT".into(),
            window: None,
        };
        let err = estimate_risk_metrics(&input).unwrap_err();
        assert_eq!(err.kind(), "InsufficientDataError");
    }
}
