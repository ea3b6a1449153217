//! Regime cache behaviour under concurrent writers and readers.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use std::thread;

use excursion_core::domain::{Direction, Label, RunId};
use excursion_core::regime::{EntryPatch, RegimeCache, UpsertOutcome};
use excursion_core::RegimeConfig;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap()
}

fn live(dir: Direction, mfe: f64, mae: f64) -> EntryPatch {
    EntryPatch {
        direction: Some(dir),
        opened_at: Some(t0()),
        mfe: Some(mfe),
        mae: Some(mae),
        ..EntryPatch::default()
    }
}

fn done(r: f64, label: Label) -> EntryPatch {
    EntryPatch {
        r_multiple: Some(r),
        label: Some(label),
        ..EntryPatch::default()
    }
}

#[test]
fn parallel_runs_on_one_instrument_all_land() {
    let cache = Arc::new(RegimeCache::default());
    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 0..20 {
                    let id = RunId::new(format!("w{worker}-{i}"));
                    let dir = if i % 2 == 0 { Direction::Long } else { Direction::Short };
                    for step in 1..=5 {
                        let x = step as f64 * 0.1;
                        cache.upsert_at("BTCUSDT", &id, live(dir, x, -x), true, t0());
                        // Readers interleave with writers.
                        let _ = cache.get_regime_lite("BTCUSDT");
                    }
                    let outcome =
                        cache.upsert_at("BTCUSDT", &id, done(1.0, Label::Neutral), false, t0());
                    assert_eq!(outcome, UpsertOutcome::Completed);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let regime = cache.get_regime_lite("BTCUSDT").unwrap();
    assert_eq!(regime.sample_count, 160);
    assert_eq!(regime.live_count, 0);
    assert!((regime.avg_mfe - 0.5).abs() < 1e-9);
    assert!((regime.avg_mae + 0.5).abs() < 1e-9);
    assert_eq!(regime.long_avg_mfe, regime.short_avg_mfe);
}

#[test]
fn first_writes_to_new_instruments_race_safely() {
    let cache = Arc::new(RegimeCache::default());
    let handles: Vec<_> = (0..16)
        .map(|worker| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for instrument in ["BTCUSDT", "ETHUSDT", "SOLUSDT"] {
                    let id = RunId::new(format!("{instrument}-{worker}"));
                    cache.upsert_at(instrument, &id, live(Direction::Long, 1.0, -1.0), true, t0());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = cache.stats();
    assert_eq!(stats.instruments, 3);
    assert_eq!(stats.entries, 48);
    assert_eq!(stats.live, 48);
}

#[test]
fn duplicate_and_reordered_live_updates_converge() {
    let updates = [(0.4, -0.1), (1.2, -0.3), (0.9, -0.8), (1.2, -0.3), (0.2, -0.05)];
    let forward = RegimeCache::default();
    let backward = RegimeCache::default();
    let id = RunId::new("r");

    for (mfe, mae) in updates {
        forward.upsert_at("X", &id, live(Direction::Long, mfe, mae), true, t0());
    }
    for (mfe, mae) in updates.iter().rev() {
        backward.upsert_at("X", &id, live(Direction::Long, *mfe, *mae), true, t0());
    }

    let a = forward.get_regime_lite("X").unwrap();
    let b = backward.get_regime_lite("X").unwrap();
    assert_eq!((a.avg_mfe, a.avg_mae), (1.2, -0.8));
    assert_eq!((a.avg_mfe, a.avg_mae), (b.avg_mfe, b.avg_mae));
}

#[test]
fn cleanup_concurrent_with_writers_keeps_counts_consistent() {
    let cache = Arc::new(RegimeCache::new(RegimeConfig {
        max_entries_per_instrument: 50,
        max_total_entries: 100,
        ..RegimeConfig::default()
    }));

    let writers: Vec<_> = (0..4)
        .map(|worker| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 0..60 {
                    let instrument = if i % 2 == 0 { "BTCUSDT" } else { "ETHUSDT" };
                    let id = RunId::new(format!("{worker}-{i}"));
                    let opened = t0() + Duration::seconds(i);
                    let patch = EntryPatch {
                        opened_at: Some(opened),
                        ..done(0.5, Label::Neutral)
                    };
                    cache.upsert_at(instrument, &id, patch, false, opened);
                }
            })
        })
        .collect();
    let sweeper = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || {
            for _ in 0..20 {
                cache.cleanup_at(t0() + Duration::minutes(5));
                thread::yield_now();
            }
        })
    };
    for handle in writers {
        handle.join().unwrap();
    }
    sweeper.join().unwrap();

    let report = cache.cleanup_at(t0() + Duration::minutes(5));
    assert_eq!(report.remaining, 100);
    assert_eq!(cache.stats().entries, 100);
    assert_eq!(report.expired, 0);
}

#[test]
fn helpers_use_configured_thresholds() {
    let cache = RegimeCache::new(RegimeConfig {
        min_samples: 2,
        max_avg_adverse_pct: 1.0,
        ..RegimeConfig::default()
    });
    cache.upsert_at("X", &RunId::new("a"), live(Direction::Short, 1.0, -1.5), true, t0());
    cache.upsert_at("X", &RunId::new("a"), done(-1.0, Label::Loss), false, t0());

    let regime = cache.get_regime_lite("X").unwrap();
    assert!(!cache.has_enough_samples(&regime));
    assert!(cache.is_high_adverse_risk(&regime, Direction::Short));
    // No long entries: falls back to the overall average, same value.
    assert!(cache.is_high_adverse_risk(&regime, Direction::Long));

    cache.upsert_at("X", &RunId::new("b"), done(2.0, Label::Win), false, t0());
    let regime = cache.get_regime_lite("X").unwrap();
    assert!(cache.has_enough_samples(&regime));
}
