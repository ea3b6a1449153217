//! Simulation outcomes: exit kind, quality label and the final result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::RunId;
use super::signal::Direction;
use crate::config::LabelThresholds;

/// How a simulated position left the market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeKind {
    TakeProfit,
    PartialTakeProfit,
    StopLoss,
    Timeout,
}

impl OutcomeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeKind::TakeProfit => "take-profit",
            OutcomeKind::PartialTakeProfit => "partial-take-profit",
            OutcomeKind::StopLoss => "stop-loss",
            OutcomeKind::Timeout => "timeout",
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Five-tier quality label of a completed run, serialized as -2..=2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "i8", try_from = "i8")]
pub enum Label {
    StrongLoss,
    Loss,
    Neutral,
    Win,
    StrongWin,
}

impl Label {
    /// Classify a risk multiple on the threshold ladder.
    ///
    /// Total over all inputs: anything that fails every cut point, NaN
    /// included, lands on `StrongLoss`.
    pub fn classify(r_multiple: f64, thresholds: &LabelThresholds) -> Self {
        if r_multiple >= thresholds.strong_win {
            Label::StrongWin
        } else if r_multiple >= thresholds.win {
            Label::Win
        } else if r_multiple >= thresholds.neutral {
            Label::Neutral
        } else if r_multiple >= thresholds.loss {
            Label::Loss
        } else {
            Label::StrongLoss
        }
    }

    pub fn value(self) -> i8 {
        match self {
            Label::StrongLoss => -2,
            Label::Loss => -1,
            Label::Neutral => 0,
            Label::Win => 1,
            Label::StrongWin => 2,
        }
    }

    pub fn magnitude(self) -> u8 {
        self.value().unsigned_abs()
    }
}

impl From<Label> for i8 {
    fn from(label: Label) -> Self {
        label.value()
    }
}

impl TryFrom<i8> for Label {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            -2 => Ok(Label::StrongLoss),
            -1 => Ok(Label::Loss),
            0 => Ok(Label::Neutral),
            1 => Ok(Label::Win),
            2 => Ok(Label::StrongWin),
            other => Err(format!("label out of range: {other}")),
        }
    }
}

/// Final, immutable outcome of one simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub run_id: RunId,
    pub instrument: String,
    pub direction: Direction,
    pub outcome: OutcomeKind,
    /// Realized PnL as a decimal fraction of entry (0.10 = +10%).
    pub pnl: f64,
    pub pnl_pct: f64,
    pub r_multiple: f64,
    pub label: Label,
    /// Maximum favorable excursion, percent of entry, in `[0, clamp]`.
    pub mfe: f64,
    /// Maximum adverse excursion, percent of entry, in `[-clamp, 0]`.
    pub mae: f64,
    /// Price at which the last remaining fraction was closed.
    pub exit_price: f64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub time_to_mfe_ms: i64,
    pub time_to_mae_ms: i64,
    pub bars_processed: u32,
    pub partial_fills: u32,
}

impl SimulationResult {
    pub fn is_win(&self) -> bool {
        self.r_multiple > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ladder() -> LabelThresholds {
        LabelThresholds::default()
    }

    #[test]
    fn ladder_examples() {
        assert_eq!(Label::classify(3.2, &ladder()).value(), 2);
        assert_eq!(Label::classify(-2.0, &ladder()).value(), -2);
        assert_eq!(Label::classify(-0.5, &ladder()).value(), 0);
    }

    #[test]
    fn ladder_cut_points_are_inclusive() {
        assert_eq!(Label::classify(3.0, &ladder()), Label::StrongWin);
        assert_eq!(Label::classify(1.5, &ladder()), Label::Win);
        assert_eq!(Label::classify(1.49, &ladder()), Label::Neutral);
        assert_eq!(Label::classify(-1.5, &ladder()), Label::Loss);
        assert_eq!(Label::classify(-1.51, &ladder()), Label::StrongLoss);
    }

    #[test]
    fn nan_falls_to_bottom_tier() {
        assert_eq!(Label::classify(f64::NAN, &ladder()), Label::StrongLoss);
    }

    #[test]
    fn label_serializes_as_integer() {
        assert_eq!(serde_json::to_string(&Label::Loss).unwrap(), "-1");
        let back: Label = serde_json::from_str("2").unwrap();
        assert_eq!(back, Label::StrongWin);
        assert!(serde_json::from_str::<Label>("3").is_err());
    }

    #[test]
    fn outcome_kind_is_kebab_case() {
        assert_eq!(
            serde_json::to_string(&OutcomeKind::PartialTakeProfit).unwrap(),
            "\"partial-take-profit\""
        );
        assert_eq!(OutcomeKind::StopLoss.to_string(), "stop-loss");
    }
}
