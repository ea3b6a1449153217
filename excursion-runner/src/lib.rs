//! Excursion Runner: orchestration around the core simulator and cache.
//!
//! This crate builds on `excursion-core` to provide:
//! - TOML application config and tracing setup
//! - One tokio task per simulation run, with graceful draining
//! - Periodic regime cache maintenance
//! - JSONL persistence behind a bounded queue
//! - Warm start of the regime cache from persisted history

pub mod config;
pub mod logging;
pub mod maintenance;
pub mod persistence;
pub mod service;
pub mod supervisor;
pub mod warm_start;

pub use config::{AppConfig, LoggingConfig, PersistenceConfig};
pub use maintenance::Maintenance;
pub use persistence::{JsonlHistory, PersistenceQueue, QueueReport};
pub use service::{shutdown_signal, Service, ShutdownReport};
pub use supervisor::{DrainReport, RunOutcome, Supervisor};
pub use warm_start::{warm_start, warm_start_at, WarmStartReport};
