//! Immutable configuration values for the simulator and the regime cache.
//!
//! Each component receives its config once at construction; nothing here is
//! read from global state.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;
use crate::feed::parse_period;

/// Risk-multiple cut points of the five-tier label ladder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelThresholds {
    pub strong_win: f64,
    pub win: f64,
    pub neutral: f64,
    pub loss: f64,
}

impl Default for LabelThresholds {
    fn default() -> Self {
        Self {
            strong_win: 3.0,
            win: 1.5,
            neutral: -0.5,
            loss: -1.5,
        }
    }
}

impl LabelThresholds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let cuts = [self.strong_win, self.win, self.neutral, self.loss];
        if cuts.iter().any(|c| !c.is_finite()) {
            return Err(ConfigError::Invalid {
                field: "label_thresholds",
                reason: "cut points must be finite".into(),
            });
        }
        if !(self.strong_win > self.win && self.win > self.neutral && self.neutral > self.loss) {
            return Err(ConfigError::Invalid {
                field: "label_thresholds",
                reason: format!(
                    "cut points must be strictly descending, got {} / {} / {} / {}",
                    self.strong_win, self.win, self.neutral, self.loss
                ),
            });
        }
        Ok(())
    }
}

/// Upper bound on a run's wall-clock budget: ten years.
pub const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Settings for one simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Feed period label, e.g. "1m" or "4h".
    pub bar_period: String,
    /// Poll cadence override; defaults to the feed's bar duration.
    pub poll_interval_ms: Option<u64>,
    /// Wait before re-polling when the feed has no new bar.
    pub retry_delay_ms: u64,
    pub max_bars: Option<u32>,
    pub max_duration_secs: u64,
    /// Risk distance (percent of entry) when the signal carries none.
    pub fallback_risk_pct: f64,
    /// Bars whose high/low stray beyond this multiple of entry are rejected.
    pub max_bar_deviation: f64,
    /// Remaining position at or below this counts as closed.
    pub position_epsilon: f64,
    pub label_thresholds: LabelThresholds,
    pub mfe_clamp: f64,
    pub mae_clamp: f64,
    pub publish_live_updates: bool,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            bar_period: "1m".into(),
            poll_interval_ms: None,
            retry_delay_ms: 1_000,
            max_bars: None,
            max_duration_secs: 86_400,
            fallback_risk_pct: 1.5,
            max_bar_deviation: 10.0,
            position_epsilon: 0.01,
            label_thresholds: LabelThresholds::default(),
            mfe_clamp: 1_000.0,
            mae_clamp: 1_000.0,
            publish_live_updates: true,
        }
    }
}

impl SimulatorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_period(&self.bar_period)?;
        positive("fallback_risk_pct", self.fallback_risk_pct)?;
        positive("mfe_clamp", self.mfe_clamp)?;
        positive("mae_clamp", self.mae_clamp)?;
        if !(self.max_bar_deviation.is_finite() && self.max_bar_deviation > 1.0) {
            return Err(ConfigError::Invalid {
                field: "max_bar_deviation",
                reason: format!("must be greater than 1, got {}", self.max_bar_deviation),
            });
        }
        if !(self.position_epsilon.is_finite()
            && self.position_epsilon >= 0.0
            && self.position_epsilon < 1.0)
        {
            return Err(ConfigError::Invalid {
                field: "position_epsilon",
                reason: format!("must be in [0, 1), got {}", self.position_epsilon),
            });
        }
        if self.max_duration_secs == 0 || self.max_duration_secs > MAX_DURATION_SECS {
            return Err(ConfigError::Invalid {
                field: "max_duration_secs",
                reason: format!(
                    "must be in 1..={MAX_DURATION_SECS}, got {}",
                    self.max_duration_secs
                ),
            });
        }
        if self.retry_delay_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "retry_delay_ms",
                reason: "must be non-zero".into(),
            });
        }
        if self.max_bars == Some(0) {
            return Err(ConfigError::Invalid {
                field: "max_bars",
                reason: "must be non-zero when set".into(),
            });
        }
        if self.poll_interval_ms == Some(0) {
            return Err(ConfigError::Invalid {
                field: "poll_interval_ms",
                reason: "must be non-zero when set".into(),
            });
        }
        self.label_thresholds.validate()
    }

    /// The run budget, capped at [`MAX_DURATION_SECS`] even when unvalidated.
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs.min(MAX_DURATION_SECS))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Risk-per-unit fraction used when a signal has no explicit risk.
    pub fn fallback_risk_fraction(&self) -> f64 {
        self.fallback_risk_pct / 100.0
    }
}

/// Settings for the regime cache and its maintenance pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    pub recent_window_hours: u64,
    pub max_entries_per_instrument: usize,
    pub max_total_entries: usize,
    pub cleanup_interval_secs: u64,
    /// Minimum completed samples before a regime is trusted.
    pub min_samples: usize,
    /// Ceiling on average adverse excursion (percent, positive number).
    pub max_avg_adverse_pct: f64,
    pub max_excursion_ratio: f64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            recent_window_hours: 24,
            max_entries_per_instrument: 250,
            max_total_entries: 5_000,
            cleanup_interval_secs: 300,
            min_samples: 5,
            max_avg_adverse_pct: 2.0,
            max_excursion_ratio: 50.0,
        }
    }
}

impl RegimeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.recent_window_hours == 0 {
            return Err(ConfigError::Invalid {
                field: "recent_window_hours",
                reason: "must be non-zero".into(),
            });
        }
        if self.max_entries_per_instrument == 0 {
            return Err(ConfigError::Invalid {
                field: "max_entries_per_instrument",
                reason: "must be non-zero".into(),
            });
        }
        if self.max_total_entries < self.max_entries_per_instrument {
            return Err(ConfigError::Invalid {
                field: "max_total_entries",
                reason: format!(
                    "{} is below max_entries_per_instrument ({})",
                    self.max_total_entries, self.max_entries_per_instrument
                ),
            });
        }
        if self.cleanup_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "cleanup_interval_secs",
                reason: "must be non-zero".into(),
            });
        }
        positive("max_avg_adverse_pct", self.max_avg_adverse_pct)?;
        positive("max_excursion_ratio", self.max_excursion_ratio)
    }

    pub fn recent_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.recent_window_hours as i64)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("must be positive, got {value}"),
        })
    }
}
