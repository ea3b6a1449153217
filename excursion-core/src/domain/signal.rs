//! TradeSignal: the immutable description of a hypothetical trade.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::SimulationError;

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// Signed return of moving from `entry` to `exit`, as a fraction of entry.
    pub fn return_fraction(self, entry: f64, exit: f64) -> f64 {
        match self {
            Direction::Long => (exit - entry) / entry,
            Direction::Short => (entry - exit) / entry,
        }
    }

    /// True if `candidate` is strictly better for the holder than `current`.
    pub fn is_more_favorable(self, candidate: f64, current: f64) -> bool {
        match self {
            Direction::Long => candidate > current,
            Direction::Short => candidate < current,
        }
    }

    /// True if a level belongs on the profit side of `entry`.
    pub fn is_profit_side(self, level: f64, entry: f64) -> bool {
        self.is_more_favorable(level, entry)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rung of a partial take-profit ladder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PartialTakeProfit {
    pub price: f64,
    /// Fraction of the original position closed at this level.
    pub weight: f64,
}

impl PartialTakeProfit {
    pub fn new(price: f64, weight: f64) -> Self {
        Self { price, weight }
    }
}

/// A proposed trade: entry, protective stop and profit targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSignal {
    pub instrument: String,
    pub direction: Direction,
    pub entry_price: f64,
    #[serde(default)]
    pub stop_loss: Option<f64>,
    #[serde(default)]
    pub take_profit: Option<f64>,
    #[serde(default)]
    pub partial_take_profits: Vec<PartialTakeProfit>,
    /// Trailing-stop distance in price units.
    #[serde(default)]
    pub trailing_distance: Option<f64>,
    /// Risk distance in percent of entry; falls back to the configured default.
    #[serde(default)]
    pub risk_pct: Option<f64>,
    pub opened_at: DateTime<Utc>,
    /// Model features captured when the signal fired.
    #[serde(default)]
    pub features: BTreeMap<String, f64>,
}

/// A signal field that was discarded during sanitisation.
#[derive(Debug, Clone, PartialEq)]
pub enum DroppedField {
    StopLoss(f64),
    TakeProfit(f64),
    PartialLevel(PartialTakeProfit),
    TrailingDistance(f64),
    RiskPct(f64),
}

impl fmt::Display for DroppedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DroppedField::StopLoss(p) => write!(f, "stop-loss {p} on wrong side of entry"),
            DroppedField::TakeProfit(p) => write!(f, "take-profit {p} on wrong side of entry"),
            DroppedField::PartialLevel(l) => {
                write!(f, "partial level {} (weight {}) unusable", l.price, l.weight)
            }
            DroppedField::TrailingDistance(d) => write!(f, "trailing distance {d} not positive"),
            DroppedField::RiskPct(r) => write!(f, "risk pct {r} not positive"),
        }
    }
}

impl TradeSignal {
    /// Minimal signal with no exits configured.
    pub fn new(
        instrument: impl Into<String>,
        direction: Direction,
        entry_price: f64,
        opened_at: DateTime<Utc>,
    ) -> Self {
        Self {
            instrument: instrument.into(),
            direction,
            entry_price,
            stop_loss: None,
            take_profit: None,
            partial_take_profits: Vec::new(),
            trailing_distance: None,
            risk_pct: None,
            opened_at,
            features: BTreeMap::new(),
        }
    }

    pub fn with_stop_loss(mut self, price: f64) -> Self {
        self.stop_loss = Some(price);
        self
    }

    pub fn with_take_profit(mut self, price: f64) -> Self {
        self.take_profit = Some(price);
        self
    }

    pub fn with_partial(mut self, price: f64, weight: f64) -> Self {
        self.partial_take_profits
            .push(PartialTakeProfit::new(price, weight));
        self
    }

    pub fn with_trailing_distance(mut self, distance: f64) -> Self {
        self.trailing_distance = Some(distance);
        self
    }

    pub fn with_risk_pct(mut self, pct: f64) -> Self {
        self.risk_pct = Some(pct);
        self
    }

    /// Check fatal input errors, then drop recoverable anomalies.
    ///
    /// Returns the cleaned signal plus the list of discarded fields. Partial
    /// levels come back sorted nearest-first for the trade's direction.
    pub fn sanitize(&self) -> Result<(TradeSignal, Vec<DroppedField>), SimulationError> {
        if self.instrument.trim().is_empty() {
            return Err(SimulationError::EmptyInstrument);
        }
        if !self.entry_price.is_finite() || self.entry_price <= 0.0 {
            return Err(SimulationError::InvalidEntryPrice(self.entry_price));
        }

        let entry = self.entry_price;
        let dir = self.direction;
        let mut clean = self.clone();
        let mut dropped = Vec::new();

        if let Some(sl) = self.stop_loss {
            // The stop must sit on the loss side, strictly away from entry.
            if !sl.is_finite() || sl <= 0.0 || !dir.is_more_favorable(entry, sl) {
                clean.stop_loss = None;
                dropped.push(DroppedField::StopLoss(sl));
            }
        }

        if let Some(tp) = self.take_profit {
            if !tp.is_finite() || !dir.is_profit_side(tp, entry) {
                clean.take_profit = None;
                dropped.push(DroppedField::TakeProfit(tp));
            }
        }

        let (kept, rejected): (Vec<_>, Vec<_>) =
            self.partial_take_profits.iter().copied().partition(|l| {
                l.price.is_finite()
                    && l.weight.is_finite()
                    && l.weight > 0.0
                    && dir.is_profit_side(l.price, entry)
            });
        dropped.extend(rejected.into_iter().map(DroppedField::PartialLevel));
        clean.partial_take_profits = kept;
        clean.partial_take_profits.sort_by(|a, b| match dir {
            Direction::Long => a.price.total_cmp(&b.price),
            Direction::Short => b.price.total_cmp(&a.price),
        });

        if let Some(d) = self.trailing_distance {
            if !d.is_finite() || d <= 0.0 {
                clean.trailing_distance = None;
                dropped.push(DroppedField::TrailingDistance(d));
            }
        }

        if let Some(r) = self.risk_pct {
            if !r.is_finite() || r <= 0.0 {
                clean.risk_pct = None;
                dropped.push(DroppedField::RiskPct(r));
            }
        }

        Ok((clean, dropped))
    }
}
