use clap::Args;
use serde_json::Value;
use std::time::Instant;

use beta_alloc_core::market_data::returns::build_return_table;
use beta_alloc_core::with_metadata;

use super::read_prices;

/// Arguments for building a return table from prices
#[derive(Args)]
pub struct ReturnsArgs {
    /// Wide price CSV (date,<asset>,...)
    #[arg(long)]
    pub prices: Option<String>,

    /// Path to a JSON/YAML price table (asset -> [{date, price}])
    #[arg(long, conflicts_with = "prices")]
    pub input: Option<String>,
}

pub fn run_returns(args: ReturnsArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let start = Instant::now();
    let prices = read_prices(args.prices.as_deref(), args.input.as_deref())?;
    let table = build_return_table(&prices)?;

    let mut warnings = Vec::new();
    if table.len() < 2 {
        warnings.push(format!(
            "Only {} aligned return periods; estimation needs at least 2",
            table.len()
        ));
    }
    let assumptions = serde_json::json!({
        "n_assets": table.assets.len(),
        "periods": table.len(),
    });
    let output = with_metadata(
        "Simple Returns on Common Dates",
        &assumptions,
        warnings,
        start.elapsed().as_micros() as u64,
        table,
    );
    Ok(serde_json::to_value(output)?)
}
