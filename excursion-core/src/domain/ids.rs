//! Run identity: stable, content-derived ids for simulation runs.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::signal::TradeSignal;

/// Identity of one simulation run, unique within an instrument's entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive a run id from the signal and a per-simulator sequence number.
    ///
    /// Uses BLAKE3 over the canonical JSON of the signal so ids are stable
    /// across builds and platforms; the sequence separates repeated
    /// submissions of an identical signal.
    pub fn for_signal(signal: &TradeSignal, sequence: u64) -> Self {
        use serde_json::json;

        let canonical = json!({
            "signal": signal,
            "sequence": sequence,
        });
        let hash = blake3::hash(canonical.to_string().as_bytes());
        Self(hash.to_hex()[..16].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}
