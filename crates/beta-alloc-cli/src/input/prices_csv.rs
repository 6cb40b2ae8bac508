use beta_alloc_core::market_data::prices::{PricePoint, PriceTable};
use beta_alloc_core::AllocationError;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::fs::File;
use std::io::Read;
use std::str::FromStr;

use super::file::resolve_path;

/// Read a wide price CSV: `date,<asset>,<asset>...`, one row per day.
/// Empty cells mean the asset has no price that day.
pub fn read_price_csv(path: &str) -> Result<PriceTable, Box<dyn std::error::Error>> {
    let canonical = resolve_path(path)?;
    let file = File::open(&canonical)
        .map_err(|e| format!("Failed to read '{}': {}", canonical.display(), e))?;
    parse_price_csv(file).map_err(|e| format!("{}: {}", canonical.display(), e).into())
}

pub fn parse_price_csv<R: Read>(reader: R) -> Result<PriceTable, Box<dyn std::error::Error>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    match headers.get(0) {
        Some(h) if h.eq_ignore_ascii_case("date") => {}
        _ => return Err("first column must be 'date'".into()),
    }
    let assets: Vec<String> = headers.iter().skip(1).map(String::from).collect();
    if assets.is_empty() {
        return Err("no asset columns".into());
    }

    let mut table = PriceTable::new();
    for asset in &assets {
        if table.insert(asset.clone(), Vec::new()).is_some() {
            return Err(format!("duplicate column '{}'", asset).into());
        }
    }

    for (idx, record) in rdr.records().enumerate() {
        let record = record?;
        let line = idx + 2;
        let raw_date = record.get(0).unwrap_or_default();
        let date = NaiveDate::parse_from_str(raw_date, "%Y-%m-%d")
            .map_err(|e| {
                AllocationError::DateError(format!(
                    "line {}: invalid date '{}': {}",
                    line, raw_date, e
                ))
            })?;

        for (asset, cell) in assets.iter().zip(record.iter().skip(1)) {
            if cell.is_empty() {
                continue;
            }
            let price = Decimal::from_str(cell)
                .or_else(|_| Decimal::from_scientific(cell))
                .map_err(|_| format!("line {}: invalid price '{}' for {}", line, cell, asset))?;
            if let Some(history) = table.get_mut(asset) {
                history.push(PricePoint::new(date, price));
            }
        }
    }

    tracing::debug!(assets = table.len(), "parsed price csv");
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_wide_csv_with_gaps() {
        let data = "date,AAA,SPY\n2024-01-02,100,470.5\n2024-01-03,,472\n2024-01-04,101.5,1e2\n";
        let table = parse_price_csv(data.as_bytes()).unwrap();
        assert_eq!(table["AAA"].len(), 2);
        assert_eq!(table["SPY"].len(), 3);
        assert_eq!(table["AAA"][1].price, dec!(101.5));
        assert_eq!(table["SPY"][2].price, dec!(100));
    }

    #[test]
    fn test_missing_date_header() {
        let data = "day,AAA\n2024-01-02,100\n";
        assert!(parse_price_csv(data.as_bytes()).is_err());
    }

    #[test]
    fn test_bad_date_is_date_error() {
        let data = "date,AAA\n2024-01-02,100\n2024-13-40,101\n";
        let err = parse_price_csv(data.as_bytes()).unwrap_err();
        let err = err.downcast_ref::<AllocationError>().unwrap();
        assert_eq!(err.kind(), "DateError");
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn test_bad_price_names_line() {
        let data = "date,AAA\n2024-01-02,abc\n";
        let err = parse_price_csv(data.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}
