use serde_json::{Map, Value};
use tabled::{builder::Builder, Table};

use super::{scalar, weight_rows};

/// Format output as tables using the tabled crate.
pub fn print_table(value: &Value) {
    match value {
        Value::Object(map) => {
            if let Some(result) = map.get("result") {
                print_result_table(result, map);
            } else {
                print_flat_object(map, &[]);
            }
        }
        _ => println!("{}", value),
    }
}

fn print_result_table(result: &Value, envelope: &Map<String, Value>) {
    let Value::Object(res_map) = result else {
        print_flat_object(envelope, &[]);
        return;
    };

    // Allocation pipeline nests the estimator and optimizer outputs.
    let risk = res_map.get("risk").and_then(Value::as_object).unwrap_or(res_map);
    let optimization = res_map
        .get("optimization")
        .and_then(Value::as_object)
        .unwrap_or(res_map);

    let mut shown: Vec<&str> = vec!["risk", "optimization"];

    if let Some(weights) = res_map.get("weights") {
        print_weights(weights);
        shown.push("weights");
    }
    if let Some(cov) = risk.get("covariance") {
        print_covariance(cov, risk.get("betas"));
        shown.extend(["covariance", "betas", "fits"]);
    }
    if let Some(Value::Array(periods)) = res_map.get("periods") {
        print_periods(periods, res_map);
        shown.extend(["periods", "period_returns", "growth_path", "returns", "assets"]);
    }

    print_flat_object(optimization, &shown);
    if !std::ptr::eq(optimization, res_map) {
        print_flat_object(res_map, &shown);
    }

    if let Some(Value::Array(warnings)) = envelope.get("warnings") {
        if !warnings.is_empty() {
            println!("\nWarnings:");
            for w in warnings {
                if let Value::String(s) = w {
                    println!("  - {}", s);
                }
            }
        }
    }

    if let Some(Value::String(meth)) = envelope.get("methodology") {
        println!("\nMethodology: {}", meth);
    }
}

fn print_weights(weights: &Value) {
    let rows = weight_rows(weights);
    if rows.is_empty() {
        return;
    }
    let mut builder = Builder::default();
    builder.push_record(["Asset", "Weight"]);
    for (asset, w) in rows {
        builder.push_record([asset, w]);
    }
    println!("{}", Table::from(builder));
}

fn print_covariance(cov: &Value, betas: Option<&Value>) {
    let assets: Vec<String> = cov
        .get("assets")
        .and_then(Value::as_array)
        .map(|a| a.iter().map(scalar).collect())
        .unwrap_or_default();
    let values = cov.get("values").and_then(Value::as_array);
    let beta_values = betas
        .and_then(|b| b.get("betas"))
        .and_then(Value::as_array);
    let Some(values) = values else { return };

    let mut header = vec![String::new()];
    header.extend(assets.iter().cloned());
    if beta_values.is_some() {
        header.push("beta".into());
    }
    let mut builder = Builder::default();
    builder.push_record(header);
    for (i, row) in values.iter().enumerate() {
        let mut record = vec![assets.get(i).cloned().unwrap_or_default()];
        if let Value::Array(cells) = row {
            record.extend(cells.iter().map(scalar));
        }
        if let Some(b) = beta_values {
            record.push(b.get(i).map(scalar).unwrap_or_default());
        }
        builder.push_record(record);
    }
    println!("{}", Table::from(builder));
}

fn print_periods(periods: &[Value], res_map: &Map<String, Value>) {
    let returns = res_map.get("period_returns").and_then(Value::as_array);
    let growth = res_map.get("growth_path").and_then(Value::as_array);
    let columns = res_map.get("returns").and_then(Value::as_array);
    let assets: Vec<String> = res_map
        .get("assets")
        .and_then(Value::as_array)
        .map(|a| a.iter().map(scalar).collect())
        .unwrap_or_default();

    let mut builder = Builder::default();
    let mut header = vec!["Date".to_string()];
    if let (Some(_), Some(_)) = (returns, growth) {
        header.extend(["Return".to_string(), "Growth".to_string()]);
    } else {
        header.extend(assets.iter().cloned());
    }
    builder.push_record(header);

    for (t, date) in periods.iter().enumerate() {
        let mut record = vec![scalar(date)];
        match (returns, growth) {
            (Some(r), Some(g)) => {
                record.push(r.get(t).map(scalar).unwrap_or_default());
                record.push(g.get(t).map(scalar).unwrap_or_default());
            }
            _ => {
                for col in columns.into_iter().flatten() {
                    record.push(col.get(t).map(scalar).unwrap_or_default());
                }
            }
        }
        builder.push_record(record);
    }
    println!("{}", Table::from(builder));
}

fn print_flat_object(map: &Map<String, Value>, skip: &[&str]) {
    let mut builder = Builder::default();
    builder.push_record(["Field", "Value"]);
    let mut any = false;
    for (key, val) in map {
        if skip.contains(&key.as_str()) {
            continue;
        }
        builder.push_record([key.as_str(), &format_value(val)]);
        any = true;
    }
    if any {
        println!("{}", Table::from(builder));
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Array(arr) => {
            let items: Vec<String> = arr.iter().map(format_value).collect();
            items.join(", ")
        }
        other => scalar(other),
    }
}
