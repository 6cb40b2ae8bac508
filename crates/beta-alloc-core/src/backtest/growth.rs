use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

use crate::error::AllocationError;
use crate::market_data::returns::ReturnTable;
use crate::types::{with_metadata, AssetId, ComputationOutput, Rate};
use crate::AllocationResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Input for a buy-and-hold backtest of a fixed weight vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestInput {
    /// Weight per asset. Assets in the table without a weight are held at 0.
    pub weights: BTreeMap<AssetId, Decimal>,
    /// Realised returns over the evaluation period.
    pub returns: ReturnTable,
    /// Cash to allocate; enables the allocation and ending-value fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_capital: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestOutput {
    pub periods: Vec<NaiveDate>,
    /// Weighted portfolio return per period.
    pub period_returns: Vec<Rate>,
    /// Running product of `1 + r`.
    pub growth_path: Vec<Decimal>,
    /// Final growth factor (1.0 = break-even).
    pub cumulative_growth: Decimal,
    pub total_return: Rate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allocations: Option<BTreeMap<AssetId, Decimal>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ending_value: Option<Decimal>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Apply a weight vector to a return table and compound the result.
pub fn run_backtest(input: &BacktestInput) -> AllocationResult<ComputationOutput<BacktestOutput>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    input.returns.validate()?;
    for asset in input.weights.keys() {
        if input.returns.index_of(asset).is_none() {
            return Err(AllocationError::InvalidInput {
                field: "weights".into(),
                reason: format!("Asset '{}' has no return series", asset),
            });
        }
    }
    if let Some(capital) = input.initial_capital {
        if capital < Decimal::ZERO {
            return Err(AllocationError::InvalidInput {
                field: "initial_capital".into(),
                reason: "Initial capital must be non-negative".into(),
            });
        }
    }

    let weight_sum: Decimal = input.weights.values().copied().sum();
    if (weight_sum - Decimal::ONE).abs() > dec!(0.0001) {
        warnings.push(format!(
            "Weights sum to {}; the remainder is treated as uninvested cash",
            weight_sum
        ));
    }
    if input.returns.is_empty() {
        warnings.push("Return table has no periods; growth is 1.0".into());
    }

    let aligned: Vec<Decimal> = input
        .returns
        .assets
        .iter()
        .map(|a| input.weights.get(a).copied().unwrap_or(Decimal::ZERO))
        .collect();
    let period_returns = portfolio_period_returns(&aligned, &input.returns)?;

    let mut growth_path = Vec::with_capacity(period_returns.len());
    let mut growth = Decimal::ONE;
    for r in &period_returns {
        growth *= Decimal::ONE + r;
        growth_path.push(growth);
    }
    let cumulative = cumulative_growth(&period_returns);

    // Cash split to the cent, as a broker order would be sized.
    let allocations = input.initial_capital.map(|capital| {
        input
            .weights
            .iter()
            .map(|(a, w)| (a.clone(), (*w * capital).round_dp(2)))
            .collect::<BTreeMap<_, _>>()
    });
    let ending_value = allocations.as_ref().map(|alloc| {
        let invested: Decimal = alloc.values().copied().sum();
        let cash = input.initial_capital.unwrap_or(Decimal::ZERO) - invested;
        let grown: Decimal = alloc
            .iter()
            .map(|(a, amount)| *amount * asset_growth(&input.returns, a))
            .sum();
        (grown + cash).round_dp(2)
    });

    tracing::debug!(
        periods = period_returns.len(),
        growth = %cumulative,
        "backtest complete"
    );

    let output = BacktestOutput {
        periods: input.returns.periods.clone(),
        period_returns,
        growth_path,
        cumulative_growth: cumulative,
        total_return: cumulative - Decimal::ONE,
        allocations,
        ending_value,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Buy-and-Hold Backtest (per-period weighted returns, compounded)",
        &serde_json::json!({
            "n_assets": input.weights.len(),
            "periods": input.returns.len(),
            "weight_sum": weight_sum.to_string(),
            "initial_capital": input.initial_capital.map(|c| c.to_string()),
        }),
        warnings,
        elapsed,
        output,
    ))
}

/// Portfolio return of each period: `sum_i w_i * r_i,t`.
///
/// `weights` follows the table's asset order.
pub fn portfolio_period_returns(
    weights: &[Decimal],
    table: &ReturnTable,
) -> AllocationResult<Vec<Rate>> {
    if weights.len() != table.assets.len() {
        return Err(AllocationError::InvalidInput {
            field: "weights".into(),
            reason: format!(
                "Expected {} weights but got {}",
                table.assets.len(),
                weights.len()
            ),
        });
    }
    Ok((0..table.len())
        .map(|t| {
            table
                .returns
                .iter()
                .zip(weights.iter())
                .map(|(col, w)| *w * col[t])
                .sum()
        })
        .collect())
}

/// Product of `1 + r` over the series; 1 for an empty series.
pub fn cumulative_growth(period_returns: &[Rate]) -> Decimal {
    period_returns
        .iter()
        .fold(Decimal::ONE, |g, r| g * (Decimal::ONE + r))
}

/// Buy-and-hold growth of one asset over the whole table.
fn asset_growth(table: &ReturnTable, asset: &str) -> Decimal {
    table
        .column(asset)
        .map(cumulative_growth)
        .unwrap_or(Decimal::ONE)
}
