//! Per-run simulation state and the pure per-bar step.
//!
//! `SimulationRun` never touches the feed, the cache or the sink. The async
//! driver in [`super::Simulator`] feeds it bars and acts on the returned
//! [`Step`], which keeps the exit logic testable without a runtime.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::ratchet::StopRatchet;
use crate::config::SimulatorConfig;
use crate::domain::{
    Bar, BarRejection, Direction, Label, OutcomeKind, RunId, SimulationResult, TradeSignal,
};
use crate::regime::EntryPatch;

/// Result of feeding one bar to a run.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Bar time not after the last bar seen; ignored.
    Stale,
    /// Bar failed validation; run state untouched.
    Rejected(BarRejection),
    /// Bar processed, position still open.
    Open { extrema_moved: bool },
    /// Position closed on this bar.
    Exit(Exit),
}

/// How and where the position was closed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Exit {
    pub kind: OutcomeKind,
    /// Price at which the last remaining fraction was closed.
    pub price: f64,
    pub at: DateTime<Utc>,
}

/// Direction-aware running extreme with the time it was last improved.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Extreme {
    price: f64,
    at: DateTime<Utc>,
}

/// Mutable state of one simulated trade.
#[derive(Debug, Clone)]
pub struct SimulationRun {
    run_id: RunId,
    signal: TradeSignal,
    config: Arc<SimulatorConfig>,
    risk_fraction: f64,

    // ── Position ──
    remaining: f64,
    realized: f64,
    stop: StopRatchet,
    next_level: usize,
    partial_fills: u32,

    // ── Extremes ──
    favorable: Extreme,
    adverse: Extreme,

    // ── Budget ──
    bars_processed: u32,
    last_seen: Option<DateTime<Utc>>,
    last_valid: Option<Bar>,
}

impl SimulationRun {
    /// Start a run from an already-sanitized signal.
    pub fn new(run_id: RunId, signal: TradeSignal, config: Arc<SimulatorConfig>) -> Self {
        let start = Extreme {
            price: signal.entry_price,
            at: signal.opened_at,
        };
        let risk_fraction = signal
            .risk_pct
            .filter(|r| r.is_finite() && *r > 0.0)
            .map_or_else(|| config.fallback_risk_fraction(), |r| r / 100.0);

        Self {
            run_id,
            stop: StopRatchet::with_initial_level(signal.direction, signal.stop_loss),
            risk_fraction,
            remaining: 1.0,
            realized: 0.0,
            next_level: 0,
            partial_fills: 0,
            favorable: start,
            adverse: start,
            bars_processed: 0,
            last_seen: None,
            last_valid: None,
            signal,
            config,
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn signal(&self) -> &TradeSignal {
        &self.signal
    }

    pub fn remaining(&self) -> f64 {
        self.remaining
    }

    pub fn realized(&self) -> f64 {
        self.realized
    }

    pub fn stop_level(&self) -> Option<f64> {
        self.stop.level()
    }

    pub fn bars_processed(&self) -> u32 {
        self.bars_processed
    }

    pub fn favorable_extreme(&self) -> (f64, DateTime<Utc>) {
        (self.favorable.price, self.favorable.at)
    }

    pub fn adverse_extreme(&self) -> (f64, DateTime<Utc>) {
        (self.adverse.price, self.adverse.at)
    }

    fn direction(&self) -> Direction {
        self.signal.direction
    }

    fn entry(&self) -> f64 {
        self.signal.entry_price
    }

    // ── Per-bar step ──

    /// Process one bar: validate, track extremes, trail the stop, then check
    /// partial levels, take-profit, stop-loss and the budget in that order.
    pub fn on_bar(&mut self, bar: &Bar) -> Step {
        if self.last_seen.is_some_and(|last| bar.time <= last) {
            return Step::Stale;
        }
        // A rejected bar may be re-served corrected under the same timestamp.
        if let Err(reason) = bar.validate(self.entry(), self.config.max_bar_deviation) {
            return Step::Rejected(reason);
        }
        self.last_seen = Some(bar.time);
        self.bars_processed += 1;
        self.last_valid = Some(bar.clone());

        let (favorable_px, adverse_px) = match self.direction() {
            Direction::Long => (bar.high, bar.low),
            Direction::Short => (bar.low, bar.high),
        };
        let new_favorable = self.direction().is_more_favorable(favorable_px, self.favorable.price);
        if new_favorable {
            self.favorable = Extreme {
                price: favorable_px,
                at: bar.time,
            };
        }
        let new_adverse = self.direction().is_more_favorable(self.adverse.price, adverse_px);
        if new_adverse {
            self.adverse = Extreme {
                price: adverse_px,
                at: bar.time,
            };
        }

        if new_favorable {
            if let Some(distance) = self.signal.trailing_distance {
                let proposed = match self.direction() {
                    Direction::Long => self.favorable.price - distance,
                    Direction::Short => self.favorable.price + distance,
                };
                self.stop.propose(proposed);
            }
        }

        if let Some(exit) = self.check_partials(bar) {
            return Step::Exit(exit);
        }

        if let Some(tp) = self.signal.take_profit {
            if self.touches_target(tp, bar) {
                return Step::Exit(self.close_remaining(OutcomeKind::TakeProfit, tp, bar.time));
            }
        }

        if let Some(stop) = self.stop.level() {
            if self.stop.is_touched(bar.high, bar.low) {
                return Step::Exit(self.close_remaining(OutcomeKind::StopLoss, stop, bar.time));
            }
        }

        if self.budget_exhausted(bar.time) {
            return Step::Exit(self.close_remaining(
                OutcomeKind::Timeout,
                self.conservative_price(bar),
                bar.time,
            ));
        }

        Step::Open {
            extrema_moved: new_favorable || new_adverse,
        }
    }

    fn touches_target(&self, target: f64, bar: &Bar) -> bool {
        match self.direction() {
            Direction::Long => bar.high >= target,
            Direction::Short => bar.low <= target,
        }
    }

    /// Fire every touched partial level in nearest-first order.
    fn check_partials(&mut self, bar: &Bar) -> Option<Exit> {
        let epsilon = self.config.position_epsilon;
        while let Some(level) = self.signal.partial_take_profits.get(self.next_level).copied() {
            if !self.touches_target(level.price, bar) || self.remaining <= epsilon {
                break;
            }
            let weight = level.weight.min(self.remaining);
            self.realized += weight * self.direction().return_fraction(self.entry(), level.price);
            self.remaining = (self.remaining - weight).max(0.0);
            self.next_level += 1;
            self.partial_fills += 1;

            if self.remaining <= epsilon {
                return Some(self.close_remaining(
                    OutcomeKind::PartialTakeProfit,
                    level.price,
                    bar.time,
                ));
            }
        }
        None
    }

    fn close_remaining(&mut self, kind: OutcomeKind, price: f64, at: DateTime<Utc>) -> Exit {
        self.realized += self.remaining * self.direction().return_fraction(self.entry(), price);
        self.remaining = 0.0;
        Exit { kind, price, at }
    }

    /// Low of the bar for longs, high for shorts.
    fn conservative_price(&self, bar: &Bar) -> f64 {
        match self.direction() {
            Direction::Long => bar.low,
            Direction::Short => bar.high,
        }
    }

    fn budget_exhausted(&self, bar_time: DateTime<Utc>) -> bool {
        let bars_spent = self
            .config
            .max_bars
            .is_some_and(|max| self.bars_processed >= max);
        let elapsed = bar_time - self.signal.opened_at;
        let time_spent = elapsed.num_seconds() >= 0
            && elapsed.num_seconds() as u64 >= self.config.max_duration_secs;
        bars_spent || time_spent
    }

    /// Force-close the position outside a bar step (deadline or closed feed).
    ///
    /// Exits at the conservative extreme of the last valid bar, or at entry
    /// when no bar was ever accepted. The close time is `at`, or the last
    /// valid bar's time if that is later.
    pub fn force_timeout(&mut self, at: DateTime<Utc>) -> Exit {
        let price = match &self.last_valid {
            Some(bar) => self.conservative_price(bar),
            None => self.entry(),
        };
        let at = self.last_valid.as_ref().map_or(at, |bar| at.max(bar.time));
        self.close_remaining(OutcomeKind::Timeout, price, at)
    }

    // ── Reporting ──

    fn mfe_pct(&self) -> f64 {
        let pct = self.direction().return_fraction(self.entry(), self.favorable.price) * 100.0;
        pct.clamp(0.0, self.config.mfe_clamp)
    }

    fn mae_pct(&self) -> f64 {
        let pct = self.direction().return_fraction(self.entry(), self.adverse.price) * 100.0;
        pct.clamp(-self.config.mae_clamp, 0.0)
    }

    /// Interim snapshot for the regime cache.
    pub fn live_patch(&self) -> EntryPatch {
        EntryPatch {
            direction: Some(self.direction()),
            opened_at: Some(self.signal.opened_at),
            mfe: Some(self.mfe_pct()),
            mae: Some(self.mae_pct()),
            ..EntryPatch::default()
        }
    }

    /// Build the final result for an exit produced by this run.
    pub fn finalize(&self, exit: &Exit) -> SimulationResult {
        let opened_at = self.signal.opened_at;
        let since_open = |t: DateTime<Utc>| (t - opened_at).num_milliseconds().max(0);
        let r_multiple = self.realized / self.risk_fraction;

        SimulationResult {
            run_id: self.run_id.clone(),
            instrument: self.signal.instrument.clone(),
            direction: self.direction(),
            outcome: exit.kind,
            pnl: self.realized,
            pnl_pct: self.realized * 100.0,
            r_multiple,
            label: Label::classify(r_multiple, &self.config.label_thresholds),
            mfe: self.mfe_pct(),
            mae: self.mae_pct(),
            exit_price: exit.price,
            opened_at,
            closed_at: exit.at,
            duration_ms: since_open(exit.at),
            time_to_mfe_ms: since_open(self.favorable.at),
            time_to_mae_ms: since_open(self.adverse.at),
            bars_processed: self.bars_processed,
            partial_fills: self.partial_fills,
        }
    }
}
