//! SimulationRecord: the durable form of a finalized run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ids::RunId;
use super::outcome::{Label, OutcomeKind, SimulationResult};
use super::signal::{Direction, PartialTakeProfit, TradeSignal};

/// One finalized simulation as handed to the persistence sink.
///
/// Carries the trade's original parameters next to its outcome so the row is
/// usable as a labeled training sample on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationRecord {
    // ── Identification ──
    pub run_id: RunId,
    pub instrument: String,
    pub direction: Direction,

    // ── Trade parameters ──
    pub entry_price: f64,
    pub stop_loss: Option<f64>,
    pub trailing_distance: Option<f64>,
    pub take_profit: Option<f64>,
    #[serde(default)]
    pub partial_take_profits: Vec<PartialTakeProfit>,

    // ── Timing ──
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub time_to_mfe_ms: i64,
    pub time_to_mae_ms: i64,

    // ── Outcome ──
    pub outcome: OutcomeKind,
    pub pnl: f64,
    pub r_multiple: f64,
    pub label: Label,
    pub mfe: f64,
    pub mae: f64,

    #[serde(default)]
    pub features: BTreeMap<String, f64>,
}

impl SimulationRecord {
    /// Join the (sanitized) signal with the result it produced.
    pub fn from_parts(signal: &TradeSignal, result: &SimulationResult) -> Self {
        Self {
            run_id: result.run_id.clone(),
            instrument: result.instrument.clone(),
            direction: result.direction,
            entry_price: signal.entry_price,
            stop_loss: signal.stop_loss,
            trailing_distance: signal.trailing_distance,
            take_profit: signal.take_profit,
            partial_take_profits: signal.partial_take_profits.clone(),
            opened_at: result.opened_at,
            closed_at: result.closed_at,
            duration_ms: result.duration_ms,
            time_to_mfe_ms: result.time_to_mfe_ms,
            time_to_mae_ms: result.time_to_mae_ms,
            outcome: result.outcome,
            pnl: result.pnl,
            r_multiple: result.r_multiple,
            label: result.label,
            mfe: result.mfe,
            mae: result.mae,
            features: signal.features.clone(),
        }
    }

    pub fn is_winner(&self) -> bool {
        self.r_multiple > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> (TradeSignal, SimulationResult) {
        let opened = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut signal = TradeSignal::new("BTCUSDT", Direction::Long, 100.0, opened)
            .with_stop_loss(97.0)
            .with_take_profit(110.0);
        signal.features.insert("rsi".into(), 61.5);

        let result = SimulationResult {
            run_id: RunId::new("abc"),
            instrument: "BTCUSDT".into(),
            direction: Direction::Long,
            outcome: OutcomeKind::TakeProfit,
            pnl: 0.10,
            pnl_pct: 10.0,
            r_multiple: 6.67,
            label: Label::StrongWin,
            mfe: 11.0,
            mae: -1.0,
            exit_price: 110.0,
            opened_at: opened,
            closed_at: opened + chrono::Duration::minutes(5),
            duration_ms: 300_000,
            time_to_mfe_ms: 300_000,
            time_to_mae_ms: 60_000,
            bars_processed: 5,
            partial_fills: 0,
        };
        (signal, result)
    }

    #[test]
    fn from_parts_carries_signal_and_outcome() {
        let (signal, result) = sample();
        let record = SimulationRecord::from_parts(&signal, &result);
        assert_eq!(record.stop_loss, Some(97.0));
        assert_eq!(record.outcome, OutcomeKind::TakeProfit);
        assert_eq!(record.features.get("rsi"), Some(&61.5));
        assert!(record.is_winner());
    }

    #[test]
    fn record_serialization_roundtrip() {
        let (signal, result) = sample();
        let record = SimulationRecord::from_parts(&signal, &result);
        let json = serde_json::to_string(&record).unwrap();
        let back: SimulationRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
    }
}
