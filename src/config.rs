use std::path::Path;

use error_stack::{Report, ResultExt};
use serde::Deserialize;

use crate::engine::{EngineParams, IndicatorEngine};
use crate::error::ConfigError;
use crate::runner::RunMode;

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

fn default_data_dir() -> String {
    "./data".into()
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub general: GeneralConfig,
    #[serde(default)]
    pub indicators: EngineParams,
    #[serde(default)]
    pub series: Vec<SeriesConfig>,
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Accepted values: `"text"` | `"json"`
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

#[derive(Debug, Deserialize)]
pub struct SeriesConfig {
    pub symbol: String,
    #[serde(default)]
    pub mode: RunMode,
}

impl AppConfig {
    pub fn database_path(&self) -> String {
        format!("{}/candle-indicators.db", self.general.data_dir)
    }
}

/// Load and validate an `AppConfig` from a TOML file at `path`.
pub fn load(path: &Path) -> Result<AppConfig, Report<ConfigError>> {
    let content = std::fs::read_to_string(path)
        .change_context(ConfigError::ReadFile)
        .attach_with(|| format!("path: {}", path.display()))?;

    let config: AppConfig = toml::from_str(&content).change_context(ConfigError::Parse {
        reason: "invalid TOML syntax or schema mismatch".into(),
    })?;

    validate(&config)?;

    Ok(config)
}

const VALID_LOG_FORMATS: &[&str] = &["text", "json"];

fn validate(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    validate_log_format(config)?;
    validate_series_symbols(config)?;
    validate_indicator_params(config)?;
    Ok(())
}

fn validate_log_format(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    if !VALID_LOG_FORMATS.contains(&config.general.log_format.as_str()) {
        return Err(Report::new(ConfigError::Validation {
            field: format!(
                "general.log_format \"{}\" must be one of {:?}",
                config.general.log_format, VALID_LOG_FORMATS
            ),
        }));
    }
    Ok(())
}

fn validate_series_symbols(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    let mut seen = std::collections::HashSet::new();
    for series in &config.series {
        if series.symbol.trim().is_empty() {
            return Err(Report::new(ConfigError::Validation {
                field: "series.symbol must not be empty".into(),
            }));
        }
        if !seen.insert(series.symbol.as_str()) {
            return Err(Report::new(ConfigError::Validation {
                field: format!("series: duplicate symbol \"{}\"", series.symbol),
            }));
        }
    }
    Ok(())
}

fn validate_indicator_params(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    IndicatorEngine::new(config.indicators).change_context(ConfigError::Validation {
        field: "indicators".into(),
    })?;
    Ok(())
}
