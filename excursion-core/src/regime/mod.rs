//! Excursion Regime Cache: per-instrument entries and their aggregates.

pub mod cache;
pub mod entry;
pub mod stats;

pub use cache::{CacheStats, CleanupReport, RegimeCache, RejectReason, UpsertOutcome};
pub use entry::{CachedSimulationEntry, CompletedEntry, EntryPatch, LiveEntry};
pub use stats::{
    excursion_ratio, excursion_ratio_capped, has_enough_samples, is_high_adverse_risk, normalize,
    ExcursionRegime, ExcursionRegimeLite, DEFAULT_MAX_EXCURSION_RATIO,
};
