pub mod backtest;
pub mod optimize;
pub mod returns;
pub mod risk;

use beta_alloc_core::market_data::prices::PriceTable;
use beta_alloc_core::EstimationWindow;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;

use crate::input;

/// Typed input from `--input <file>` or piped stdin.
pub(crate) fn read_typed_input<T: DeserializeOwned>(
    path: Option<&str>,
    what: &str,
) -> Result<T, Box<dyn std::error::Error>> {
    if let Some(path) = path {
        input::file::read_input(path)
    } else if let Some(data) = input::stdin::read_stdin()? {
        Ok(serde_json::from_value(data)?)
    } else {
        Err(format!("--input <file.json> or stdin required for {}", what).into())
    }
}

/// Price table from a wide CSV, or JSON/YAML when `--input` is used instead.
pub(crate) fn read_prices(
    prices: Option<&str>,
    path: Option<&str>,
) -> Result<PriceTable, Box<dyn std::error::Error>> {
    match prices {
        Some(csv_path) => input::prices_csv::read_price_csv(csv_path),
        None => read_typed_input(path, "a price table"),
    }
}

pub(crate) fn window_from(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Option<EstimationWindow> {
    if start.is_none() && end.is_none() {
        None
    } else {
        Some(EstimationWindow::new(start, end))
    }
}
