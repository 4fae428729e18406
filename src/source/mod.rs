//! Serde model of the definitions dump exported by the car-definitions
//! toolchain: every known car doc plus, per fingerprint, the platform's
//! parameter object and static config. Unbounded numeric fields arrive as
//! the strings `"inf"` / `"-inf"` since JSON has no non-finite numbers.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct Definitions {
    // kept loosely typed so one malformed car cannot fail the whole load
    pub cars: Vec<Value>,
    pub platforms: BTreeMap<String, Platform>,
}

#[derive(Debug, Deserialize)]
pub struct Platform {
    pub params: serde_json::Map<String, Value>,
    pub config: PlatformConfig,
}

#[derive(Debug, Deserialize)]
pub struct PlatformConfig {
    pub specs: CarSpecs,
    pub dbc_dict: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarSpecs {
    #[serde(deserialize_with = "unbounded_f64")]
    pub mass: f64,
    #[serde(deserialize_with = "unbounded_f64")]
    pub center_to_front_ratio: f64,
    #[serde(deserialize_with = "unbounded_f64")]
    pub min_steer_speed: f64,
    #[serde(deserialize_with = "unbounded_f64")]
    pub min_enable_speed: f64,
    #[serde(deserialize_with = "unbounded_f64")]
    pub tire_stiffness_factor: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CarDoc {
    pub name: String,
    pub make: String,
    pub model: String,
    pub years: String,
    #[serde(default)]
    pub year_list: Vec<String>,
    pub package: String,
    #[serde(default)]
    pub video: Option<String>,
    #[serde(default)]
    pub setup_video: Option<String>,
    #[serde(default)]
    pub footnotes: Vec<String>,
    #[serde(deserialize_with = "unbounded_f64")]
    pub min_steer_speed: f64,
    #[serde(deserialize_with = "unbounded_f64")]
    pub min_enable_speed: f64,
    pub auto_resume: bool,
    pub merged: bool,
    pub support_type: String,
    #[serde(default)]
    pub support_link: Option<String>,
    pub detail_sentence: String,
    pub car_fingerprint: String,
    pub brand: String,
    #[serde(default)]
    pub row: serde_json::Map<String, Value>,
    #[serde(default)]
    pub car_parts: Vec<CarPart>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CarPart {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub part_type: String,
}

pub fn load_definitions(path: &Path) -> Result<Definitions> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read definitions file: {}", path.display()))?;
    serde_json::from_str(&s)
        .with_context(|| format!("failed to parse definitions file: {}", path.display()))
}

pub fn parse_unbounded(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => match s.trim() {
            "inf" | "Infinity" => Some(f64::INFINITY),
            "-inf" | "-Infinity" => Some(f64::NEG_INFINITY),
            _ => None,
        },
        _ => None,
    }
}

fn unbounded_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    parse_unbounded(&v).ok_or_else(|| {
        serde::de::Error::custom(format!("expected a number or \"inf\"/\"-inf\", got {v}"))
    })
}
