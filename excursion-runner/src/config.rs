//! Application configuration, loaded from TOML.
//!
//! Every section is optional; missing keys take the defaults of the core
//! config types.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use excursion_core::{RegimeConfig, SimulatorConfig};

/// Full runner configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub simulator: SimulatorConfig,
    pub regime: RegimeConfig,
    pub persistence: PersistenceConfig,
    pub logging: LoggingConfig,
}

/// Where finalized records go and how many may wait in memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub history_path: PathBuf,
    pub queue_capacity: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            history_path: PathBuf::from("data/simulations.jsonl"),
            queue_capacity: 1_024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive; `RUST_LOG` takes precedence.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".into(),
        }
    }
}

impl AppConfig {
    /// Read and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config = Self::from_toml_str(&text)
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).context("failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.simulator
            .validate()
            .context("invalid [simulator] section")?;
        self.regime.validate().context("invalid [regime] section")?;
        if self.persistence.queue_capacity == 0 {
            bail!("persistence.queue_capacity must be non-zero");
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [simulator]
            bar_period = "4h"
            max_bars = 50

            [regime]
            min_samples = 12

            [persistence]
            history_path = "/tmp/runs.jsonl"
            "#,
        )
        .unwrap();

        assert_eq!(config.simulator.bar_period, "4h");
        assert_eq!(config.simulator.max_bars, Some(50));
        assert_eq!(config.simulator.retry_delay_ms, 1_000);
        assert_eq!(config.regime.min_samples, 12);
        assert_eq!(config.regime.recent_window_hours, 24);
        assert_eq!(config.persistence.history_path, PathBuf::from("/tmp/runs.jsonl"));
        assert_eq!(config.persistence.queue_capacity, 1_024);
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn label_thresholds_are_configurable() {
        let config = AppConfig::from_toml_str(
            r#"
            [simulator.label_thresholds]
            strong_win = 4.0
            win = 2.0
            "#,
        )
        .unwrap();
        assert_eq!(config.simulator.label_thresholds.strong_win, 4.0);
        assert_eq!(config.simulator.label_thresholds.neutral, -0.5);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = AppConfig::from_toml_str("[simulator]\nbar_period = \"7x\"").unwrap_err();
        assert!(format!("{err:#}").contains("simulator"));

        let err = AppConfig::from_toml_str("[persistence]\nqueue_capacity = 0").unwrap_err();
        assert!(err.to_string().contains("queue_capacity"));

        let err = AppConfig::from_toml_str(
            "[regime]\nmax_entries_per_instrument = 10\nmax_total_entries = 5",
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("max_total_entries"));
    }

    #[test]
    fn serialized_config_loads_back() {
        let mut config = AppConfig::default();
        config.simulator.poll_interval_ms = Some(250);
        config.logging.filter = "excursion_core=debug".into();

        let text = config.to_toml_string().unwrap();
        assert_eq!(AppConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = AppConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("failed to read config"));
    }
}
