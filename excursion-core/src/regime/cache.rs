//! The process-wide excursion regime cache.
//!
//! Layout: an outer `RwLock` over the instrument map and one `Mutex` per
//! instrument bucket. Upserts and reads on existing instruments take the outer
//! read lock plus that bucket's mutex, so unrelated instruments never contend.
//! Adding an instrument and the cleanup pass take the outer write lock, which
//! excludes every bucket at once.
//!
//! Locks are never held across an await point and callers never receive a
//! reference into a bucket: reads hand out an `Arc` snapshot.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};

use super::entry::{CachedSimulationEntry, CompletedEntry, EntryPatch, LiveEntry};
use super::stats::{self, ExcursionRegime, ExcursionRegimeLite};
use crate::config::RegimeConfig;
use crate::domain::{Direction, RunId};

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// New live entry.
    CreatedLive,
    /// New entry stored directly as completed.
    CreatedCompleted,
    /// Existing live entry widened.
    Extended,
    /// Existing live entry moved to completed.
    Completed,
    /// Request refused; stored entry untouched.
    Rejected(RejectReason),
}

impl UpsertOutcome {
    pub fn is_applied(self) -> bool {
        !matches!(self, UpsertOutcome::Rejected(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Completed → live was requested.
    RevertToLive,
    /// The entry was already completed.
    AlreadyCompleted,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::RevertToLive => "completed entry cannot return to live",
            RejectReason::AlreadyCompleted => "completed entry is immutable",
        }
    }
}

/// Counts from one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Entries dropped for falling outside the recent window.
    pub expired: usize,
    /// Entries dropped to bring the total under the global ceiling.
    pub overflow: usize,
    pub instruments_removed: usize,
    pub remaining: usize,
}

impl CleanupReport {
    pub fn evicted(&self) -> usize {
        self.expired + self.overflow
    }
}

/// Point-in-time size counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub instruments: usize,
    pub entries: usize,
    pub live: usize,
    /// Aggregate recomputations since the cache was built.
    pub recomputations: u64,
}

#[derive(Debug, Default)]
struct Bucket {
    entries: Vec<CachedSimulationEntry>,
    memo: Option<Arc<ExcursionRegime>>,
}

impl Bucket {
    fn position(&self, run_id: &RunId) -> Option<usize> {
        self.entries.iter().position(|e| e.run_id() == run_id)
    }

    fn invalidate(&mut self) {
        self.memo = None;
    }
}

/// Concurrent, time-windowed store of per-instrument simulation entries with
/// memoized regime aggregates.
#[derive(Debug)]
pub struct RegimeCache {
    config: RegimeConfig,
    buckets: RwLock<HashMap<String, Mutex<Bucket>>>,
    recomputations: AtomicU64,
}

impl RegimeCache {
    pub fn new(config: RegimeConfig) -> Self {
        Self {
            config,
            buckets: RwLock::new(HashMap::new()),
            recomputations: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &RegimeConfig {
        &self.config
    }

    // ── Writes ──

    /// Insert or update the entry `(instrument, run_id)`.
    pub fn upsert(
        &self,
        instrument: &str,
        run_id: &RunId,
        patch: EntryPatch,
        live: bool,
    ) -> UpsertOutcome {
        self.upsert_at(instrument, run_id, patch, live, Utc::now())
    }

    /// [`upsert`](Self::upsert) with an explicit clock.
    pub fn upsert_at(
        &self,
        instrument: &str,
        run_id: &RunId,
        patch: EntryPatch,
        live: bool,
        now: DateTime<Utc>,
    ) -> UpsertOutcome {
        {
            let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(bucket) = buckets.get(instrument) {
                let mut bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
                return self.apply(instrument, &mut bucket, run_id, &patch, live, now);
            }
        }

        // Another writer may have created the bucket between the two locks.
        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        let bucket = buckets
            .entry(instrument.to_string())
            .or_default()
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        self.apply(instrument, bucket, run_id, &patch, live, now)
    }

    fn apply(
        &self,
        instrument: &str,
        bucket: &mut Bucket,
        run_id: &RunId,
        patch: &EntryPatch,
        live: bool,
        now: DateTime<Utc>,
    ) -> UpsertOutcome {
        let outcome = match bucket.position(run_id) {
            None => {
                let entry = if live {
                    CachedSimulationEntry::Live(LiveEntry::new(run_id.clone(), patch, now))
                } else {
                    CachedSimulationEntry::Completed(CompletedEntry::new(run_id.clone(), patch, now))
                };
                bucket.entries.push(entry);
                self.enforce_instrument_ceiling(instrument, bucket, run_id);
                if live {
                    UpsertOutcome::CreatedLive
                } else {
                    UpsertOutcome::CreatedCompleted
                }
            }
            Some(idx) => {
                let slot = &mut bucket.entries[idx];
                match slot {
                    CachedSimulationEntry::Live(entry) if live => {
                        entry.extend(patch, now);
                        UpsertOutcome::Extended
                    }
                    CachedSimulationEntry::Live(entry) => {
                        let completed = entry.clone().complete(patch, now);
                        *slot = CachedSimulationEntry::Completed(completed);
                        UpsertOutcome::Completed
                    }
                    CachedSimulationEntry::Completed(_) if live => {
                        UpsertOutcome::Rejected(RejectReason::RevertToLive)
                    }
                    CachedSimulationEntry::Completed(_) => {
                        UpsertOutcome::Rejected(RejectReason::AlreadyCompleted)
                    }
                }
            }
        };

        match outcome {
            UpsertOutcome::Rejected(reason) => {
                warn!(
                    instrument,
                    run_id = %run_id,
                    reason = reason.as_str(),
                    "rejected regime cache write"
                );
            }
            _ => bucket.invalidate(),
        }
        outcome
    }

    /// Drop the instrument's oldest entries beyond its ceiling, sparing the
    /// entry that was just written.
    fn enforce_instrument_ceiling(&self, instrument: &str, bucket: &mut Bucket, keep: &RunId) {
        let ceiling = self.config.max_entries_per_instrument;
        while bucket.entries.len() > ceiling {
            let oldest = bucket
                .entries
                .iter()
                .enumerate()
                .filter(|(_, e)| e.run_id() != keep)
                .min_by_key(|(_, e)| e.created_at())
                .map(|(idx, _)| idx);
            let Some(idx) = oldest else { break };
            let evicted = bucket.entries.remove(idx);
            debug!(
                instrument,
                run_id = %evicted.run_id(),
                ceiling,
                "evicted oldest entry over instrument ceiling"
            );
        }
    }

    // ── Reads ──

    /// Aggregate for an instrument, or `None` if it has no entries.
    ///
    /// Served from the memo when valid; otherwise recomputed under the
    /// bucket's lock and memoized.
    pub fn get_regime(&self, instrument: &str) -> Option<Arc<ExcursionRegime>> {
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        let mut bucket = buckets
            .get(instrument)?
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(memo) = &bucket.memo {
            return Some(Arc::clone(memo));
        }

        let regime = Arc::new(ExcursionRegime::compute(
            instrument,
            &bucket.entries,
            self.config.max_excursion_ratio,
            Utc::now(),
        )?);
        self.recomputations.fetch_add(1, Ordering::Relaxed);
        bucket.memo = Some(Arc::clone(&regime));
        Some(regime)
    }

    /// Aggregate without the entry list, read through the same memo.
    pub fn get_regime_lite(&self, instrument: &str) -> Option<ExcursionRegimeLite> {
        self.get_regime(instrument).map(|regime| regime.lite())
    }

    /// Minimum-sample gate using the configured threshold.
    pub fn has_enough_samples(&self, regime: &ExcursionRegimeLite) -> bool {
        stats::has_enough_samples(regime, self.config.min_samples)
    }

    /// Adverse-excursion gate using the configured ceiling.
    pub fn is_high_adverse_risk(&self, regime: &ExcursionRegimeLite, direction: Direction) -> bool {
        stats::is_high_adverse_risk(regime, direction, self.config.max_avg_adverse_pct)
    }

    pub fn instruments(&self) -> Vec<String> {
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = buckets.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn stats(&self) -> CacheStats {
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        let mut stats = CacheStats {
            instruments: buckets.len(),
            recomputations: self.recomputations.load(Ordering::Relaxed),
            ..CacheStats::default()
        };
        for bucket in buckets.values() {
            let bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
            stats.entries += bucket.entries.len();
            stats.live += bucket.entries.iter().filter(|e| e.is_live()).count();
        }
        stats
    }

    // ── Maintenance ──

    /// Evict expired entries, then trim to the global ceiling.
    pub fn cleanup(&self) -> CleanupReport {
        self.cleanup_at(Utc::now())
    }

    /// [`cleanup`](Self::cleanup) with an explicit clock.
    ///
    /// An entry expires once it was created more than one recent window ago,
    /// unless it is live and was updated within the last half window.
    pub fn cleanup_at(&self, now: DateTime<Utc>) -> CleanupReport {
        let window = self.config.recent_window();
        let grace = window / 2;
        let mut report = CleanupReport::default();

        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);

        // Pass 1: recent window.
        for bucket in buckets.values_mut() {
            let bucket = bucket.get_mut().unwrap_or_else(PoisonError::into_inner);
            let before = bucket.entries.len();
            bucket.entries.retain(|e| {
                now - e.created_at() <= window || (e.is_live() && now - e.touched_at() <= grace)
            });
            let dropped = before - bucket.entries.len();
            if dropped > 0 {
                report.expired += dropped;
                bucket.invalidate();
            }
        }

        // Pass 2: global ceiling, oldest by creation time first.
        let total: usize = buckets
            .values_mut()
            .map(|b| b.get_mut().unwrap_or_else(PoisonError::into_inner).entries.len())
            .sum();
        if total > self.config.max_total_entries {
            let excess = total - self.config.max_total_entries;
            let mut ages: Vec<(DateTime<Utc>, String, RunId)> = Vec::with_capacity(total);
            for (instrument, bucket) in buckets.iter_mut() {
                let bucket = bucket.get_mut().unwrap_or_else(PoisonError::into_inner);
                ages.extend(
                    bucket
                        .entries
                        .iter()
                        .map(|e| (e.created_at(), instrument.clone(), e.run_id().clone())),
                );
            }
            ages.sort();

            for (_, instrument, run_id) in ages.into_iter().take(excess) {
                if let Some(bucket) = buckets.get_mut(&instrument) {
                    let bucket = bucket.get_mut().unwrap_or_else(PoisonError::into_inner);
                    if let Some(idx) = bucket.position(&run_id) {
                        bucket.entries.remove(idx);
                        bucket.invalidate();
                        report.overflow += 1;
                    }
                }
            }
        }

        let before = buckets.len();
        buckets.retain(|_, b| {
            !b.get_mut()
                .unwrap_or_else(PoisonError::into_inner)
                .entries
                .is_empty()
        });
        report.instruments_removed = before - buckets.len();
        report.remaining = total - report.overflow;

        if report.evicted() > 0 || report.instruments_removed > 0 {
            info!(
                expired = report.expired,
                overflow = report.overflow,
                instruments_removed = report.instruments_removed,
                remaining = report.remaining,
                "regime cache cleanup"
            );
        } else {
            debug!(remaining = report.remaining, "regime cache cleanup: nothing to evict");
        }
        report
    }
}

impl Default for RegimeCache {
    fn default() -> Self {
        Self::new(RegimeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Label;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn live_patch(dir: Direction, mfe: f64, mae: f64, opened_at: DateTime<Utc>) -> EntryPatch {
        EntryPatch {
            direction: Some(dir),
            opened_at: Some(opened_at),
            mfe: Some(mfe),
            mae: Some(mae),
            ..EntryPatch::default()
        }
    }

    fn final_patch(r: f64, label: Label) -> EntryPatch {
        EntryPatch {
            r_multiple: Some(r),
            label: Some(label),
            ..EntryPatch::default()
        }
    }

    #[test]
    fn completed_entry_cannot_go_live_again() {
        let cache = RegimeCache::default();
        let id = RunId::new("r1");
        cache.upsert_at("BTCUSDT", &id, live_patch(Direction::Long, 1.0, -0.5, t0()), true, t0());
        assert_eq!(
            cache.upsert_at("BTCUSDT", &id, final_patch(2.0, Label::Win), false, t0()),
            UpsertOutcome::Completed
        );

        let before = cache.get_regime("BTCUSDT").unwrap();
        let outcome =
            cache.upsert_at("BTCUSDT", &id, live_patch(Direction::Long, 9.0, -9.0, t0()), true, t0());
        assert_eq!(outcome, UpsertOutcome::Rejected(RejectReason::RevertToLive));

        let after = cache.get_regime("BTCUSDT").unwrap();
        assert!(Arc::ptr_eq(&before, &after), "rejected write must not invalidate");
        assert!(!after.entries[0].is_live());
        assert_eq!(after.entries[0].mfe(), 1.0);
    }

    #[test]
    fn second_completion_is_rejected() {
        let cache = RegimeCache::default();
        let id = RunId::new("r1");
        cache.upsert_at("BTCUSDT", &id, final_patch(2.0, Label::Win), false, t0());
        assert_eq!(
            cache.upsert_at("BTCUSDT", &id, final_patch(-2.0, Label::StrongLoss), false, t0()),
            UpsertOutcome::Rejected(RejectReason::AlreadyCompleted)
        );
        let regime = cache.get_regime_lite("BTCUSDT").unwrap();
        assert_eq!(regime.avg_r_multiple, 2.0);
    }

    #[test]
    fn writes_invalidate_memo() {
        let cache = RegimeCache::default();
        let id = RunId::new("r1");
        cache.upsert_at("ETHUSDT", &id, live_patch(Direction::Short, 1.0, -1.0, t0()), true, t0());
        let first = cache.get_regime("ETHUSDT").unwrap();
        let again = cache.get_regime("ETHUSDT").unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(cache.stats().recomputations, 1);

        cache.upsert_at("ETHUSDT", &id, live_patch(Direction::Short, 2.0, -1.0, t0()), true, t0());
        let fresh = cache.get_regime("ETHUSDT").unwrap();
        assert!(!Arc::ptr_eq(&first, &fresh));
        assert_eq!(fresh.summary.avg_mfe, 2.0);
    }

    #[test]
    fn lite_read_shares_the_memo() {
        let cache = RegimeCache::default();
        cache.upsert_at(
            "ETHUSDT",
            &RunId::new("r1"),
            live_patch(Direction::Long, 1.0, -1.0, t0()),
            true,
            t0(),
        );
        let lite = cache.get_regime_lite("ETHUSDT").unwrap();
        let full = cache.get_regime("ETHUSDT").unwrap();
        assert_eq!(lite, full.summary);
        assert_eq!(cache.stats().recomputations, 1);
    }

    #[test]
    fn unknown_instrument_reads_as_no_data() {
        let cache = RegimeCache::default();
        assert!(cache.get_regime("NOPE").is_none());
        assert!(cache.get_regime_lite("NOPE").is_none());
    }

    #[test]
    fn instrument_ceiling_evicts_oldest() {
        let cache = RegimeCache::new(RegimeConfig {
            max_entries_per_instrument: 2,
            max_total_entries: 10,
            ..RegimeConfig::default()
        });
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            let opened = t0() + Duration::minutes(i as i64);
            cache.upsert_at(
                "SOLUSDT",
                &RunId::new(*id),
                live_patch(Direction::Long, 1.0, -1.0, opened),
                true,
                opened,
            );
        }
        let regime = cache.get_regime("SOLUSDT").unwrap();
        let ids: Vec<&str> = regime.entries.iter().map(|e| e.run_id().as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn cleanup_expires_old_entries_and_drops_empty_instruments() {
        let cache = RegimeCache::default();
        let old = t0() - Duration::hours(30);
        cache.upsert_at("BTCUSDT", &RunId::new("old"), final_patch(1.0, Label::Neutral), false, old);
        cache.upsert_at(
            "ETHUSDT",
            &RunId::new("fresh"),
            live_patch(Direction::Long, 1.0, -1.0, t0()),
            true,
            t0(),
        );

        let report = cache.cleanup_at(t0());
        assert_eq!(report.expired, 1);
        assert_eq!(report.instruments_removed, 1);
        assert_eq!(report.remaining, 1);
        assert_eq!(cache.instruments(), vec!["ETHUSDT".to_string()]);
        assert!(cache.get_regime("BTCUSDT").is_none());
    }

    #[test]
    fn recently_updated_live_entry_survives_the_window() {
        let cache = RegimeCache::default();
        let started = t0() - Duration::hours(30);
        let id = RunId::new("long-runner");
        cache.upsert_at("BTCUSDT", &id, live_patch(Direction::Long, 1.0, -1.0, started), true, started);
        cache.upsert_at(
            "BTCUSDT",
            &id,
            live_patch(Direction::Long, 2.0, -1.0, started),
            true,
            t0() - Duration::hours(2),
        );

        assert_eq!(cache.cleanup_at(t0()).expired, 0);
        // Not touched for 13h: past the half-window grace.
        assert_eq!(cache.cleanup_at(t0() + Duration::hours(11)).expired, 1);
    }

    #[test]
    fn global_ceiling_evicts_oldest_across_instruments() {
        let cache = RegimeCache::new(RegimeConfig {
            max_entries_per_instrument: 3,
            max_total_entries: 3,
            ..RegimeConfig::default()
        });
        let entries = [
            ("BTCUSDT", "b1", 0),
            ("ETHUSDT", "e1", 1),
            ("BTCUSDT", "b2", 2),
            ("ETHUSDT", "e2", 3),
            ("SOLUSDT", "s1", 4),
        ];
        for (instrument, id, minute) in entries {
            let opened = t0() + Duration::minutes(minute);
            let patch = final_patch(0.5, Label::Neutral);
            cache.upsert_at(instrument, &RunId::new(id), patch, false, opened);
        }

        let report = cache.cleanup_at(t0() + Duration::minutes(10));
        assert_eq!(report.overflow, 2);
        assert_eq!(report.remaining, 3);
        assert_eq!(cache.stats().entries, 3);
        let btc = cache.get_regime("BTCUSDT").unwrap();
        assert_eq!(btc.entries.len(), 1);
        assert_eq!(btc.entries[0].run_id().as_str(), "b2");
        assert_eq!(cache.get_regime("ETHUSDT").unwrap().entries.len(), 1);
    }

    #[test]
    fn cleanup_invalidates_touched_aggregates() {
        let cache = RegimeCache::default();
        let old = t0() - Duration::hours(30);
        cache.upsert_at("BTCUSDT", &RunId::new("old"), final_patch(-2.0, Label::StrongLoss), false, old);
        cache.upsert_at("BTCUSDT", &RunId::new("new"), final_patch(2.0, Label::Win), false, t0());
        assert_eq!(cache.get_regime_lite("BTCUSDT").unwrap().sample_count, 2);

        cache.cleanup_at(t0());
        let regime = cache.get_regime_lite("BTCUSDT").unwrap();
        assert_eq!(regime.sample_count, 1);
        assert_eq!(regime.win_rate, 1.0);
    }
}
