//! Excursion Core: trade outcome simulation and excursion regime statistics.
//!
//! This crate contains:
//! - Domain types (signals, bars, results, persisted records, run ids)
//! - The Trade Outcome Simulator: a per-signal state machine driven bar by bar
//! - The Excursion Regime Cache: concurrent per-instrument entries with
//!   memoized aggregates, time-window eviction and size ceilings
//! - Price feed and persistence sink traits, with in-memory implementations
//! - Immutable configuration values and error types

pub mod config;
pub mod domain;
pub mod error;
pub mod feed;
pub mod regime;
pub mod simulator;
pub mod sink;

pub use config::{LabelThresholds, RegimeConfig, SimulatorConfig, MAX_DURATION_SECS};
pub use error::{ConfigError, SimulationError};
pub use feed::{parse_period, FeedError, PriceFeed, ReplayFeed};
pub use regime::{ExcursionRegime, ExcursionRegimeLite, RegimeCache};
pub use simulator::Simulator;
pub use sink::{MemorySink, NullSink, PersistenceSink, SinkError};
