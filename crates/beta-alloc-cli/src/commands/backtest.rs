use clap::Args;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::BTreeMap;

use beta_alloc_core::backtest::growth::{run_backtest, BacktestInput};
use beta_alloc_core::market_data::returns::build_return_table;

use super::{read_prices, read_typed_input};
use crate::input;

/// Arguments for backtesting a weight vector
#[derive(Args)]
pub struct BacktestArgs {
    /// Path to a JSON/YAML BacktestInput
    #[arg(long)]
    pub input: Option<String>,

    /// JSON/YAML map of asset -> weight
    #[arg(long, requires = "prices", conflicts_with = "input")]
    pub weights: Option<String>,

    /// Wide price CSV covering the evaluation period
    #[arg(long, requires = "weights")]
    pub prices: Option<String>,

    /// Cash to split across the weights
    #[arg(long)]
    pub initial_capital: Option<Decimal>,
}

pub fn run_backtest_cmd(args: BacktestArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let bt_input = match &args.weights {
        Some(weights_path) => {
            let weights: BTreeMap<String, Decimal> = input::file::read_input(weights_path)?;
            let prices = read_prices(args.prices.as_deref(), None)?;
            BacktestInput {
                weights,
                returns: build_return_table(&prices)?,
                initial_capital: args.initial_capital,
            }
        }
        None => {
            let mut parsed: BacktestInput = read_typed_input(args.input.as_deref(), "backtest")?;
            if args.initial_capital.is_some() {
                parsed.initial_capital = args.initial_capital;
            }
            parsed
        }
    };
    let result = run_backtest(&bt_input)?;
    Ok(serde_json::to_value(result)?)
}
