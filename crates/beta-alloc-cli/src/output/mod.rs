pub mod csv_out;
pub mod json;
pub mod minimal;
pub mod table;

use crate::OutputFormat;
use serde_json::Value;

/// Dispatch output to the appropriate formatter.
pub fn format_output(format: &OutputFormat, value: &Value) {
    match format {
        OutputFormat::Json => json::print_json(value),
        OutputFormat::Table => table::print_table(value),
        OutputFormat::Csv => csv_out::print_csv(value),
        OutputFormat::Minimal => minimal::print_minimal(value),
    }
}

/// Weight rows from either shape the commands emit: a map of
/// asset -> weight (pipeline) or a list of `{name, weight, raw_weight}`.
pub(crate) fn weight_rows(weights: &Value) -> Vec<(String, String)> {
    match weights {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| (k.clone(), scalar(v)))
            .collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| {
                let name = item.get("name")?.as_str()?.to_string();
                Some((name, scalar(item.get("weight")?)))
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Render a scalar JSON value without quotes; compound values as JSON.
pub(crate) fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}
