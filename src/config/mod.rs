use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub reports: ReportsConfig,
    pub metadata: MetadataConfig,
    pub diff: DiffConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportsConfig {
    pub readme_url: String,
    pub pages_base_url: String,
    pub output: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetadataConfig {
    pub definitions: String,
    pub output: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiffConfig {
    pub metadata_path: String,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            reports: ReportsConfig {
                readme_url: "https://raw.githubusercontent.com/commaai/opendbc-data/master/README.md"
                    .to_string(),
                pages_base_url: "https://commaai.github.io/opendbc-data".to_string(),
                output: "longitudinal_reports.json".to_string(),
            },
            metadata: MetadataConfig {
                definitions: "definitions.json".to_string(),
                output: "metadata.json".to_string(),
            },
            diff: DiffConfig {
                metadata_path: "src/data/metadata.json".to_string(),
            },
            config_path: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    reports: Option<RawReportsConfig>,
    metadata: Option<RawMetadataConfig>,
    diff: Option<RawDiffConfig>,
}

#[derive(Debug, Deserialize)]
struct RawReportsConfig {
    readme_url: Option<String>,
    pages_base_url: Option<String>,
    output: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMetadataConfig {
    definitions: Option<String>,
    output: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDiffConfig {
    metadata_path: Option<String>,
}

pub fn default_config_path(home_dir: &Path) -> PathBuf {
    home_dir.join(".config/cardocs/config.toml")
}

pub fn effective_home_dir() -> Result<PathBuf> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| anyhow::anyhow!("HOME environment variable is not set"))
}

pub fn load(config_path: Option<&Path>, home_dir: &Path) -> Result<EffectiveConfig> {
    let mut cfg = EffectiveConfig::default();

    let path = config_path
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| default_config_path(home_dir));

    if path.exists() {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let raw: RawConfig = toml::from_str(&s).context("failed to parse config file (TOML)")?;
        apply_raw_config(&mut cfg, raw);
        cfg.config_path = Some(path.display().to_string());
    }

    apply_env_overrides(&mut cfg);

    Ok(cfg)
}

fn apply_raw_config(cfg: &mut EffectiveConfig, raw: RawConfig) {
    if let Some(reports) = raw.reports {
        if let Some(readme_url) = reports.readme_url {
            cfg.reports.readme_url = readme_url;
        }
        if let Some(pages_base_url) = reports.pages_base_url {
            cfg.reports.pages_base_url = pages_base_url;
        }
        if let Some(output) = reports.output {
            cfg.reports.output = output;
        }
    }

    if let Some(metadata) = raw.metadata {
        if let Some(definitions) = metadata.definitions {
            cfg.metadata.definitions = definitions;
        }
        if let Some(output) = metadata.output {
            cfg.metadata.output = output;
        }
    }

    if let Some(diff) = raw.diff {
        if let Some(metadata_path) = diff.metadata_path {
            cfg.diff.metadata_path = metadata_path;
        }
    }
}

fn apply_env_overrides(cfg: &mut EffectiveConfig) {
    if let Some(v) = non_empty_env("CARDOCS_REPORTS_README_URL") {
        cfg.reports.readme_url = v;
    }
    if let Some(v) = non_empty_env("CARDOCS_REPORTS_PAGES_BASE_URL") {
        cfg.reports.pages_base_url = v;
    }
    if let Some(v) = non_empty_env("CARDOCS_REPORTS_OUTPUT") {
        cfg.reports.output = v;
    }
    if let Some(v) = non_empty_env("CARDOCS_METADATA_DEFINITIONS") {
        cfg.metadata.definitions = v;
    }
    if let Some(v) = non_empty_env("CARDOCS_METADATA_OUTPUT") {
        cfg.metadata.output = v;
    }
    if let Some(v) = non_empty_env("CARDOCS_DIFF_METADATA_PATH") {
        cfg.diff.metadata_path = v;
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    let v = std::env::var(name).ok()?;
    let v = v.trim();
    if v.is_empty() {
        return None;
    }
    Some(v.to_string())
}
