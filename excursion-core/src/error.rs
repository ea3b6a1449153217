//! Error types surfaced by the core.
//!
//! Only [`SimulationError`] ever reaches the caller of a simulation run. Feed,
//! sink and bar problems are absorbed by the run loop and logged.

use thiserror::Error;

/// Fatal input errors; the run is refused before any state exists.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulationError {
    #[error("instrument must not be empty")]
    EmptyInstrument,

    #[error("entry price must be finite and positive, got {0}")]
    InvalidEntryPrice(f64),
}

/// Invalid configuration values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("unknown bar period '{0}' (expected e.g. 30s, 1m, 5m, 1h, 4h, 1d, 1w)")]
    UnknownPeriod(String),
}
