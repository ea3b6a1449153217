//! Cached per-run entries: the live/completed lifecycle of one simulation as
//! seen by the regime cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Direction, Label, OutcomeKind, RunId, SimulationRecord, SimulationResult};

/// Fields a writer may supply for an entry. Anything left `None` takes a safe
/// default on creation and leaves the existing value alone on update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryPatch {
    pub direction: Option<Direction>,
    /// Signal open time; becomes the entry's creation timestamp.
    pub opened_at: Option<DateTime<Utc>>,
    pub mfe: Option<f64>,
    pub mae: Option<f64>,
    pub r_multiple: Option<f64>,
    pub label: Option<Label>,
    pub outcome: Option<OutcomeKind>,
    pub pnl: Option<f64>,
}

impl EntryPatch {
    /// Patch carrying the final state of a finished run.
    pub fn from_result(result: &SimulationResult) -> Self {
        Self {
            direction: Some(result.direction),
            opened_at: Some(result.opened_at),
            mfe: Some(result.mfe),
            mae: Some(result.mae),
            r_multiple: Some(result.r_multiple),
            label: Some(result.label),
            outcome: Some(result.outcome),
            pnl: Some(result.pnl),
        }
    }

    /// Patch rebuilt from a persisted record.
    pub fn from_record(record: &SimulationRecord) -> Self {
        Self {
            direction: Some(record.direction),
            opened_at: Some(record.opened_at),
            mfe: Some(record.mfe),
            mae: Some(record.mae),
            r_multiple: Some(record.r_multiple),
            label: Some(record.label),
            outcome: Some(record.outcome),
            pnl: Some(record.pnl),
        }
    }
}

/// Excursion values are kept on their own side of zero whatever the writer sends.
fn favorable(value: Option<f64>) -> f64 {
    value.filter(|v| v.is_finite()).map_or(0.0, |v| v.max(0.0))
}

fn adverse(value: Option<f64>) -> f64 {
    value.filter(|v| v.is_finite()).map_or(0.0, |v| v.min(0.0))
}

/// A run that is still open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveEntry {
    pub run_id: RunId,
    pub direction: Option<Direction>,
    pub mfe: f64,
    pub mae: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LiveEntry {
    pub fn new(run_id: RunId, patch: &EntryPatch, now: DateTime<Utc>) -> Self {
        Self {
            run_id,
            direction: patch.direction,
            mfe: favorable(patch.mfe),
            mae: adverse(patch.mae),
            created_at: patch.opened_at.unwrap_or(now),
            updated_at: now,
        }
    }

    /// Fold in a live update. Extremes only ever widen, so duplicate or
    /// reordered updates converge to the same record.
    pub fn extend(&mut self, patch: &EntryPatch, now: DateTime<Utc>) {
        self.mfe = self.mfe.max(favorable(patch.mfe));
        self.mae = self.mae.min(adverse(patch.mae));
        if self.direction.is_none() {
            self.direction = patch.direction;
        }
        self.updated_at = now;
    }

    /// Terminal transition. Consumes the live entry; there is no way back.
    pub fn complete(self, patch: &EntryPatch, now: DateTime<Utc>) -> CompletedEntry {
        CompletedEntry {
            run_id: self.run_id,
            direction: patch.direction.or(self.direction),
            mfe: patch.mfe.map_or(self.mfe, |v| favorable(Some(v))),
            mae: patch.mae.map_or(self.mae, |v| adverse(Some(v))),
            r_multiple: finite_or_zero(patch.r_multiple),
            label: patch.label.unwrap_or(Label::Neutral),
            outcome: patch.outcome,
            pnl: finite_or_zero(patch.pnl),
            created_at: self.created_at,
            completed_at: now,
        }
    }
}

/// A finished run. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedEntry {
    pub run_id: RunId,
    pub direction: Option<Direction>,
    pub mfe: f64,
    pub mae: f64,
    pub r_multiple: f64,
    pub label: Label,
    pub outcome: Option<OutcomeKind>,
    pub pnl: f64,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl CompletedEntry {
    pub fn new(run_id: RunId, patch: &EntryPatch, now: DateTime<Utc>) -> Self {
        LiveEntry::new(run_id, &EntryPatch::default(), patch.opened_at.unwrap_or(now))
            .complete(patch, now)
    }

    pub fn is_win(&self) -> bool {
        self.r_multiple > 0.0
    }

    /// A losing run whose label sits at least one tier away from neutral.
    pub fn is_reversal(&self) -> bool {
        self.r_multiple < 0.0 && self.label.magnitude() >= 1
    }
}

fn finite_or_zero(value: Option<f64>) -> f64 {
    value.filter(|v| v.is_finite()).unwrap_or(0.0)
}

/// One run as known to the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum CachedSimulationEntry {
    Live(LiveEntry),
    Completed(CompletedEntry),
}

impl CachedSimulationEntry {
    pub fn run_id(&self) -> &RunId {
        match self {
            CachedSimulationEntry::Live(e) => &e.run_id,
            CachedSimulationEntry::Completed(e) => &e.run_id,
        }
    }

    pub fn direction(&self) -> Option<Direction> {
        match self {
            CachedSimulationEntry::Live(e) => e.direction,
            CachedSimulationEntry::Completed(e) => e.direction,
        }
    }

    pub fn mfe(&self) -> f64 {
        match self {
            CachedSimulationEntry::Live(e) => e.mfe,
            CachedSimulationEntry::Completed(e) => e.mfe,
        }
    }

    pub fn mae(&self) -> f64 {
        match self {
            CachedSimulationEntry::Live(e) => e.mae,
            CachedSimulationEntry::Completed(e) => e.mae,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            CachedSimulationEntry::Live(e) => e.created_at,
            CachedSimulationEntry::Completed(e) => e.created_at,
        }
    }

    /// Last write time: update time for live entries, completion time otherwise.
    pub fn touched_at(&self) -> DateTime<Utc> {
        match self {
            CachedSimulationEntry::Live(e) => e.updated_at,
            CachedSimulationEntry::Completed(e) => e.completed_at,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, CachedSimulationEntry::Live(_))
    }

    pub fn as_completed(&self) -> Option<&CompletedEntry> {
        match self {
            CachedSimulationEntry::Completed(e) => Some(e),
            CachedSimulationEntry::Live(_) => None,
        }
    }
}
