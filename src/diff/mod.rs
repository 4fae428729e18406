use std::collections::BTreeMap;
use std::io::Write;

use anyhow::{Context, Result, bail};
use serde_json::Value;

pub const OUTPUT_KEY: &str = "changed_summary";
pub const OUTPUT_ENV: &str = "GITHUB_OUTPUT";

pub fn load_snapshot(text: &str) -> Result<Vec<Value>> {
    let value: Value = serde_json::from_str(text).context("failed to parse metadata JSON")?;
    match value {
        Value::Array(records) => Ok(records),
        other => bail!(
            "expected a JSON array of car records, got {}",
            type_name(&other)
        ),
    }
}

// Same-length snapshots only. An added or removed car produces no summary;
// this job announces in-place edits, nothing else.
pub fn change_summary(committed: &[Value], updated: &[Value]) -> String {
    if committed.len() != updated.len() {
        return String::new();
    }

    let committed_cars = index_by_name(committed);
    let updated_cars = index_by_name(updated);

    let mut changed = 0usize;
    let mut cars_by_platform: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (&name, committed_car) in &committed_cars {
        let Some(updated_car) = updated_cars.get(name) else {
            continue;
        };
        if committed_car == updated_car {
            continue;
        }
        let platform = updated_car
            .get("car_fingerprint")
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
            .unwrap_or("UNKNOWN");
        cars_by_platform.entry(platform).or_default().push(name);
        changed += 1;
    }

    if changed == 0 {
        return String::new();
    }

    let mut lines = vec![format!(
        "Spec changes in {changed} car(s) across {} platform(s):",
        cars_by_platform.len()
    )];
    for (platform, cars) in &cars_by_platform {
        lines.push(format!("- {platform}: {}", cars.join(", ")));
    }
    lines.join("\n")
}

pub fn write_ci_output(summary: &str) -> Result<()> {
    let path = std::env::var(OUTPUT_ENV)
        .ok()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| {
            crate::exit::invalid_args(format!(
                "{OUTPUT_ENV} is not set; cannot write the change summary"
            ))
        })?;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open CI output file: {path}"))?;
    write!(file, "{OUTPUT_KEY}<<EOF\n{summary}\nEOF\n")
        .with_context(|| format!("failed to write CI output file: {path}"))?;
    Ok(())
}

// Records without a usable name are invisible to the diff. Duplicate names
// keep the last occurrence, matching a name-keyed index build.
fn index_by_name(cars: &[Value]) -> BTreeMap<&str, &Value> {
    cars.iter()
        .filter_map(|car| {
            let name = car.get("name").and_then(Value::as_str)?;
            if name.is_empty() {
                return None;
            }
            Some((name, car))
        })
        .collect()
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
