use chrono::NaiveDate;
use clap::Args;
use serde_json::Value;

use beta_alloc_core::market_data::returns::build_return_table;
use beta_alloc_core::risk_metrics::estimator::{estimate_risk_metrics, RiskMetricsInput};

use super::{read_prices, read_typed_input, window_from};

/// Arguments for covariance and beta estimation
#[derive(Args)]
pub struct RiskArgs {
    /// Path to a JSON/YAML RiskMetricsInput
    #[arg(long)]
    pub input: Option<String>,

    /// Wide price CSV including the benchmark column
    #[arg(long, requires = "benchmark")]
    pub prices: Option<String>,

    /// Benchmark column (e.g. SPY)
    #[arg(long)]
    pub benchmark: Option<String>,

    /// First return date to include (YYYY-MM-DD)
    #[arg(long)]
    pub start: Option<NaiveDate>,

    /// Last return date to include (YYYY-MM-DD)
    #[arg(long)]
    pub end: Option<NaiveDate>,
}

pub fn run_risk(args: RiskArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let risk_input: RiskMetricsInput = match (&args.prices, &args.benchmark) {
        (Some(_), Some(benchmark)) => {
            let prices = read_prices(args.prices.as_deref(), None)?;
            RiskMetricsInput {
                returns: build_return_table(&prices)?,
                benchmark: benchmark.clone(),
                window: window_from(args.start, args.end),
            }
        }
        _ => {
            let mut parsed: RiskMetricsInput =
                read_typed_input(args.input.as_deref(), "risk estimation")?;
            if let Some(w) = window_from(args.start, args.end) {
                parsed.window = Some(w);
            }
            parsed
        }
    };
    let result = estimate_risk_metrics(&risk_input)?;
    Ok(serde_json::to_value(result)?)
}
