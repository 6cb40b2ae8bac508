use serde_json::{Map, Value};
use std::io;

use super::{scalar, weight_rows};

/// Write output as CSV to stdout.
///
/// Weights become `asset,weight` rows, backtests and return tables one row
/// per period; anything else is a two-column field/value listing.
pub fn print_csv(value: &Value) {
    let stdout = io::stdout();
    let mut wtr = csv::Writer::from_writer(stdout.lock());

    let result = value
        .as_object()
        .and_then(|m| m.get("result"))
        .and_then(Value::as_object);

    match result {
        Some(res) if res.contains_key("weights") => {
            let _ = wtr.write_record(["asset", "weight"]);
            for (asset, w) in weight_rows(&res["weights"]) {
                let _ = wtr.write_record([asset, w]);
            }
        }
        Some(res) if res.contains_key("periods") => write_periods(&mut wtr, res),
        Some(res) => write_fields(&mut wtr, res),
        None => match value {
            Value::Object(map) => write_fields(&mut wtr, map),
            _ => {
                let _ = wtr.write_record([scalar(value)]);
            }
        },
    }

    let _ = wtr.flush();
}

fn write_periods(wtr: &mut csv::Writer<io::StdoutLock<'_>>, res: &Map<String, Value>) {
    let periods = res.get("periods").and_then(Value::as_array);
    let Some(periods) = periods else { return };

    if let (Some(Value::Array(r)), Some(Value::Array(g))) =
        (res.get("period_returns"), res.get("growth_path"))
    {
        let _ = wtr.write_record(["date", "return", "growth"]);
        for (t, date) in periods.iter().enumerate() {
            let row = [
                scalar(date),
                r.get(t).map(scalar).unwrap_or_default(),
                g.get(t).map(scalar).unwrap_or_default(),
            ];
            let _ = wtr.write_record(row);
        }
        return;
    }

    // Return table: one column per asset.
    let assets: Vec<String> = res
        .get("assets")
        .and_then(Value::as_array)
        .map(|a| a.iter().map(scalar).collect())
        .unwrap_or_default();
    let columns: Vec<Value> = res
        .get("returns")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut header = vec!["date".to_string()];
    header.extend(assets);
    let _ = wtr.write_record(&header);
    for (t, date) in periods.iter().enumerate() {
        let mut row = vec![scalar(date)];
        row.extend(columns.iter().map(|c| c.get(t).map(scalar).unwrap_or_default()));
        let _ = wtr.write_record(&row);
    }
}

fn write_fields(wtr: &mut csv::Writer<io::StdoutLock<'_>>, map: &Map<String, Value>) {
    let _ = wtr.write_record(["field", "value"]);
    for (key, val) in map {
        let _ = wtr.write_record([key.as_str(), &scalar(val)]);
    }
}
