//! Rebuild the regime cache from persisted history.

use chrono::{DateTime, Utc};
use tracing::info;

use excursion_core::domain::SimulationRecord;
use excursion_core::regime::{EntryPatch, UpsertOutcome};
use excursion_core::RegimeCache;

/// What a warm start did with the history it was given.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmStartReport {
    pub loaded: usize,
    /// Opened before the recent window.
    pub stale: usize,
    /// Run id already present in the cache.
    pub duplicates: usize,
}

/// Load records opened within the cache's recent window as completed entries.
pub fn warm_start(cache: &RegimeCache, records: &[SimulationRecord]) -> WarmStartReport {
    warm_start_at(cache, records, Utc::now())
}

pub fn warm_start_at(
    cache: &RegimeCache,
    records: &[SimulationRecord],
    now: DateTime<Utc>,
) -> WarmStartReport {
    let window = cache.config().recent_window();
    let mut report = WarmStartReport::default();

    let mut recent: Vec<&SimulationRecord> = Vec::with_capacity(records.len());
    for record in records {
        if now - record.opened_at <= window {
            recent.push(record);
        } else {
            report.stale += 1;
        }
    }
    recent.sort_by_key(|r| r.opened_at);

    for record in recent {
        let patch = EntryPatch::from_record(record);
        match cache.upsert_at(&record.instrument, &record.run_id, patch, false, record.closed_at) {
            UpsertOutcome::CreatedCompleted => report.loaded += 1,
            _ => report.duplicates += 1,
        }
    }

    info!(
        loaded = report.loaded,
        stale = report.stale,
        duplicates = report.duplicates,
        instruments = cache.instruments().len(),
        "regime cache warm start"
    );
    report
}
