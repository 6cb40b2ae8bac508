use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

use crate::market_data::prices::PriceTable;
use crate::market_data::returns::build_return_table;
use crate::optimization::solver::SolverOptions;
use crate::optimization::target_beta::{optimize, TargetBetaOutput};
use crate::risk_metrics::estimator::{estimate_risk_metrics, RiskEstimate, RiskMetricsInput};
use crate::types::{with_metadata, AssetId, ComputationOutput, EstimationWindow};
use crate::AllocationResult;

/// Prices in, target-beta weights out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationInput {
    /// Price history for every asset and the benchmark.
    pub prices: PriceTable,
    pub benchmark: AssetId,
    pub target_beta: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<EstimationWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solver: Option<SolverOptions>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationOutput {
    pub risk: RiskEstimate,
    pub optimization: TargetBetaOutput,
    /// Rounded weights keyed by every non-benchmark asset.
    pub weights: BTreeMap<AssetId, Decimal>,
}

/// Run returns -> covariance and betas -> optimizer in one call.
///
/// Warnings from the estimation and optimization stages are carried through
/// in that order.
pub fn allocate(input: &AllocationInput) -> AllocationResult<ComputationOutput<AllocationOutput>> {
    let start = Instant::now();

    let returns = build_return_table(&input.prices)?;
    let risk = estimate_risk_metrics(&RiskMetricsInput {
        returns,
        benchmark: input.benchmark.clone(),
        window: input.window.clone(),
    })?;
    let opt = optimize(
        &risk.result.covariance,
        &risk.result.betas,
        input.target_beta,
        input.solver.clone(),
    )?;

    let mut warnings = risk.warnings;
    warnings.extend(opt.warnings);

    let weights = opt.result.weight_map();
    tracing::info!(
        assets = weights.len(),
        target_beta = %input.target_beta,
        volatility = %opt.result.portfolio_volatility,
        "allocation complete"
    );

    let output = AllocationOutput {
        risk: risk.result,
        optimization: opt.result,
        weights,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Target-Beta Minimum Variance Allocation",
        &serde_json::json!({
            "benchmark": input.benchmark,
            "target_beta": input.target_beta.to_string(),
            "observations": output.risk.observations,
            "window": input.window,
        }),
        warnings,
        elapsed,
        output,
    ))
}
