//! Criterion benchmarks for the hot paths.
//!
//! Benchmarks:
//! 1. Regime recomputation after an invalidating write
//! 2. Memoized regime reads (full and lite)
//! 3. Cleanup over a populated cache
//! 4. Per-bar simulation step

use chrono::{DateTime, Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;

use excursion_core::domain::{Bar, Direction, Label, RunId, TradeSignal};
use excursion_core::regime::{EntryPatch, RegimeCache};
use excursion_core::simulator::SimulationRun;
use excursion_core::{RegimeConfig, SimulatorConfig};

// ── Helpers ──────────────────────────────────────────────────────────

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn populated_cache(instruments: usize, per_instrument: usize) -> RegimeCache {
    let cache = RegimeCache::new(RegimeConfig {
        max_entries_per_instrument: per_instrument,
        max_total_entries: instruments * per_instrument,
        ..RegimeConfig::default()
    });
    for i in 0..instruments {
        let instrument = format!("SYM{i}");
        for j in 0..per_instrument {
            let id = RunId::new(format!("{i}-{j}"));
            let x = (j % 17) as f64 * 0.3;
            let direction = if j % 2 == 0 { Direction::Long } else { Direction::Short };
            let patch = EntryPatch {
                direction: Some(direction),
                opened_at: Some(t0() + Duration::seconds(j as i64)),
                mfe: Some(x),
                mae: Some(-x / 2.0),
                r_multiple: Some(x - 2.0),
                label: Some(Label::Neutral),
                ..EntryPatch::default()
            };
            cache.upsert_at(&instrument, &id, patch, j % 5 == 0, t0());
        }
    }
    cache
}

// ── 1. Recompute ─────────────────────────────────────────────────────

fn bench_recompute(c: &mut Criterion) {
    let mut group = c.benchmark_group("regime_recompute");
    for size in [50usize, 250] {
        let cache = populated_cache(1, size);
        let id = RunId::new("0-0");
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                // A live write invalidates the memo; the read recomputes.
                let patch = EntryPatch {
                    mfe: Some(0.1),
                    ..EntryPatch::default()
                };
                cache.upsert_at("SYM0", &id, patch, true, t0());
                black_box(cache.get_regime("SYM0"))
            })
        });
    }
    group.finish();
}

// ── 2. Cached reads ──────────────────────────────────────────────────

fn bench_cached_reads(c: &mut Criterion) {
    let cache = populated_cache(10, 250);
    let _ = cache.get_regime("SYM3");

    c.bench_function("regime_read_memoized", |b| {
        b.iter(|| black_box(cache.get_regime(black_box("SYM3"))))
    });
    c.bench_function("regime_read_lite_memoized", |b| {
        b.iter(|| black_box(cache.get_regime_lite(black_box("SYM3"))))
    });
}

// ── 3. Cleanup ───────────────────────────────────────────────────────

fn bench_cleanup(c: &mut Criterion) {
    c.bench_function("cleanup_20x250_nothing_expired", |b| {
        let cache = populated_cache(20, 250);
        b.iter(|| black_box(cache.cleanup_at(t0() + Duration::hours(1))))
    });
}

// ── 4. Simulation step ───────────────────────────────────────────────

fn bench_on_bar(c: &mut Criterion) {
    let bars: Vec<Bar> = (0..1_000)
        .map(|i| {
            let close = 100.0 + (i as f64 * 0.05).sin() * 4.0;
            Bar::new(t0() + Duration::minutes(i + 1), close, close + 0.8, close - 0.8, close)
        })
        .collect();
    let (signal, _) = TradeSignal::new("SYM0", Direction::Long, 100.0, t0())
        .with_stop_loss(90.0)
        .with_partial(150.0, 0.5)
        .sanitize()
        .unwrap();
    let config = Arc::new(SimulatorConfig::default());

    c.bench_function("simulation_1000_bars", |b| {
        b.iter(|| {
            let mut run =
                SimulationRun::new(RunId::new("bench"), signal.clone(), Arc::clone(&config));
            for bar in &bars {
                black_box(run.on_bar(bar));
            }
            black_box(run.remaining())
        })
    });
}

criterion_group!(
    benches,
    bench_recompute,
    bench_cached_reads,
    bench_cleanup,
    bench_on_bar
);
criterion_main!(benches);
