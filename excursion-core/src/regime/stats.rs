//! Regime aggregates and the pure helpers the decision layer uses on them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entry::CachedSimulationEntry;
use crate::domain::Direction;

/// Upper bound on the excursion ratio; a near-zero MAE would otherwise explode it.
pub const DEFAULT_MAX_EXCURSION_RATIO: f64 = 50.0;

/// Aggregate statistics for one instrument, without the raw entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcursionRegimeLite {
    pub instrument: String,

    // ── Resolved outcomes (completed entries only) ──
    pub sample_count: usize,
    pub win_rate: f64,
    pub avg_r_multiple: f64,
    pub reversal_count: usize,

    // ── Exposure (completed and live entries) ──
    pub live_count: usize,
    pub avg_mfe: f64,
    pub avg_mae: f64,
    pub long_avg_mfe: Option<f64>,
    pub long_avg_mae: Option<f64>,
    pub short_avg_mfe: Option<f64>,
    pub short_avg_mae: Option<f64>,
    pub excursion_ratio: f64,

    pub computed_at: DateTime<Utc>,
}

/// Full regime: the aggregate plus the entries it was computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcursionRegime {
    #[serde(flatten)]
    pub summary: ExcursionRegimeLite,
    pub entries: Vec<CachedSimulationEntry>,
}

impl ExcursionRegime {
    /// Compute the aggregate for an instrument's entries.
    ///
    /// Returns `None` for an empty list.
    pub fn compute(
        instrument: &str,
        entries: &[CachedSimulationEntry],
        max_ratio: f64,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        if entries.is_empty() {
            return None;
        }

        let completed: Vec<_> = entries.iter().filter_map(|e| e.as_completed()).collect();
        let sample_count = completed.len();
        let live_count = entries.len() - sample_count;

        let (win_rate, avg_r_multiple) = if sample_count == 0 {
            (0.0, 0.0)
        } else {
            let wins = completed.iter().filter(|e| e.is_win()).count();
            let total_r: f64 = completed.iter().map(|e| e.r_multiple).sum();
            (wins as f64 / sample_count as f64, total_r / sample_count as f64)
        };
        let reversal_count = completed.iter().filter(|e| e.is_reversal()).count();

        let avg_mfe = mean(entries.iter().map(CachedSimulationEntry::mfe)).unwrap_or(0.0);
        let avg_mae = mean(entries.iter().map(CachedSimulationEntry::mae)).unwrap_or(0.0);
        let side_mean = |dir: Direction, pick: fn(&CachedSimulationEntry) -> f64| {
            mean(entries.iter().filter(|e| e.direction() == Some(dir)).map(pick))
        };

        let summary = ExcursionRegimeLite {
            instrument: instrument.to_string(),
            sample_count,
            win_rate,
            avg_r_multiple,
            reversal_count,
            live_count,
            avg_mfe,
            avg_mae,
            long_avg_mfe: side_mean(Direction::Long, CachedSimulationEntry::mfe),
            long_avg_mae: side_mean(Direction::Long, CachedSimulationEntry::mae),
            short_avg_mfe: side_mean(Direction::Short, CachedSimulationEntry::mfe),
            short_avg_mae: side_mean(Direction::Short, CachedSimulationEntry::mae),
            excursion_ratio: excursion_ratio_capped(avg_mfe, avg_mae, max_ratio),
            computed_at: now,
        };

        Some(Self {
            summary,
            entries: entries.to_vec(),
        })
    }

    pub fn lite(&self) -> ExcursionRegimeLite {
        self.summary.clone()
    }
}

impl ExcursionRegimeLite {
    /// Average MAE for one side, falling back to the overall figure.
    pub fn directional_mae(&self, direction: Direction) -> f64 {
        let side = match direction {
            Direction::Long => self.long_avg_mae,
            Direction::Short => self.short_avg_mae,
        };
        side.unwrap_or(self.avg_mae)
    }

    /// Average MFE for one side, falling back to the overall figure.
    pub fn directional_mfe(&self, direction: Direction) -> f64 {
        let side = match direction {
            Direction::Long => self.long_avg_mfe,
            Direction::Short => self.short_avg_mfe,
        };
        side.unwrap_or(self.avg_mfe)
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

/// MFE ÷ |MAE|, clamped to [`DEFAULT_MAX_EXCURSION_RATIO`].
///
/// An undefined ratio (MFE ≤ 0 or MAE = 0) is reported as 0, not infinity.
///
/// ```
/// use excursion_core::regime::excursion_ratio;
///
/// assert!((excursion_ratio(2.5, -1.2) - 2.083).abs() < 1e-3);
/// assert_eq!(excursion_ratio(3.0, 0.0), 0.0);
/// ```
pub fn excursion_ratio(mfe: f64, mae: f64) -> f64 {
    excursion_ratio_capped(mfe, mae, DEFAULT_MAX_EXCURSION_RATIO)
}

/// [`excursion_ratio`] with an explicit upper bound.
pub fn excursion_ratio_capped(mfe: f64, mae: f64, cap: f64) -> f64 {
    if !(mfe.is_finite() && mae.is_finite()) || mfe <= 0.0 || mae == 0.0 {
        return 0.0;
    }
    (mfe / mae.abs()).min(cap)
}

/// Express a price distance as a percentage of the entry price.
///
/// Returns 0 when either input is unusable.
pub fn normalize(value: f64, entry_price: f64) -> f64 {
    if !value.is_finite() || !entry_price.is_finite() || entry_price <= 0.0 {
        return 0.0;
    }
    value / entry_price * 100.0
}

/// Minimum-sample gate: only resolved outcomes count.
pub fn has_enough_samples(regime: &ExcursionRegimeLite, min_samples: usize) -> bool {
    regime.sample_count >= min_samples
}

/// True if the typical adverse excursion for this side exceeds the ceiling.
///
/// `max_adverse_pct` is a positive percentage; MAE values are ≤ 0.
pub fn is_high_adverse_risk(
    regime: &ExcursionRegimeLite,
    direction: Direction,
    max_adverse_pct: f64,
) -> bool {
    regime.directional_mae(direction).abs() > max_adverse_pct
}
