use serde_json::Value;

use super::{scalar, weight_rows};

/// Print just the key answer from the output.
///
/// Weights print as `asset=weight` pairs; otherwise the first well-known
/// field present wins, then the first field of the result.
pub fn print_minimal(value: &Value) {
    let result_obj = value
        .as_object()
        .and_then(|m| m.get("result"))
        .unwrap_or(value);

    if let Some(weights) = result_obj.get("weights") {
        let pairs: Vec<String> = weight_rows(weights)
            .into_iter()
            .map(|(a, w)| format!("{}={}", a, w))
            .collect();
        if !pairs.is_empty() {
            println!("{}", pairs.join(" "));
            return;
        }
    }

    let priority_keys = [
        "cumulative_growth",
        "portfolio_volatility",
        "observations",
        "periods",
    ];

    if let Value::Object(map) = result_obj {
        for key in &priority_keys {
            if let Some(val) = map.get(*key) {
                if !val.is_null() {
                    println!("{}", format_minimal(val));
                    return;
                }
            }
        }

        if let Some((key, val)) = map.iter().next() {
            println!("{}: {}", key, format_minimal(val));
            return;
        }
    }

    println!("{}", format_minimal(result_obj));
}

fn format_minimal(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Array(arr) => format!("{} entries", arr.len()),
        other => scalar(other),
    }
}
