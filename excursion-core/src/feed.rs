//! Price feed abstraction and an in-memory replay implementation.
//!
//! The simulator only needs two things from a market-data gateway: the most
//! recent completed bar for an instrument, and the duration of a bar period.
//! Real gateways implement [`PriceFeed`] elsewhere; [`ReplayFeed`] scripts bars
//! for tests and offline replays.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

use crate::domain::Bar;
use crate::error::ConfigError;

/// Errors a price feed may report.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeedError {
    #[error("feed unavailable: {0}")]
    Unavailable(String),

    #[error("instrument not served by feed: {0}")]
    UnknownInstrument(String),

    /// The feed will never produce another bar for this instrument.
    #[error("feed closed for {0}")]
    Closed(String),
}

impl FeedError {
    /// Whether polling again later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, FeedError::Unavailable(_))
    }
}

/// Source of completed OHLC bars.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Most recent completed bar, or `None` if nothing is available yet.
    ///
    /// Returning the same bar on consecutive polls is allowed; the simulator
    /// ignores bars it has already processed.
    async fn latest_completed_bar(&self, instrument: &str) -> Result<Option<Bar>, FeedError>;

    /// Duration of one bar of the given period label.
    fn period_to_duration(&self, period: &str) -> Result<Duration, ConfigError> {
        parse_period(period)
    }
}

/// Parse a period label such as `30s`, `1m`, `5m`, `1h`, `4h`, `1d` or `1w`.
pub fn parse_period(label: &str) -> Result<Duration, ConfigError> {
    let unknown = || ConfigError::UnknownPeriod(label.to_string());
    let label = label.trim();
    if label.len() < 2 || !label.is_ascii() {
        return Err(unknown());
    }

    let (count, unit) = label.split_at(label.len() - 1);
    let count: u64 = count.parse().map_err(|_| unknown())?;
    if count == 0 {
        return Err(unknown());
    }
    let unit_secs = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        "w" => 604_800,
        _ => return Err(unknown()),
    };
    count
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(unknown)
}

/// Scripted feed: each poll hands out the next queued bar for the instrument.
///
/// A drained queue reports "no bar yet", or [`FeedError::Closed`] when built
/// with [`ReplayFeed::closing_when_drained`].
#[derive(Debug, Default)]
pub struct ReplayFeed {
    queues: Mutex<HashMap<String, VecDeque<Bar>>>,
    close_when_drained: bool,
}

impl ReplayFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn closing_when_drained(mut self) -> Self {
        self.close_when_drained = true;
        self
    }

    pub fn with_bars(self, instrument: &str, bars: impl IntoIterator<Item = Bar>) -> Self {
        self.push_bars(instrument, bars);
        self
    }

    /// Append bars to an instrument's queue.
    pub fn push_bars(&self, instrument: &str, bars: impl IntoIterator<Item = Bar>) {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        queues
            .entry(instrument.to_string())
            .or_default()
            .extend(bars);
    }

    /// Bars still waiting to be served for an instrument.
    pub fn pending(&self, instrument: &str) -> usize {
        let queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        queues.get(instrument).map_or(0, VecDeque::len)
    }
}

#[async_trait]
impl PriceFeed for ReplayFeed {
    async fn latest_completed_bar(&self, instrument: &str) -> Result<Option<Bar>, FeedError> {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        let next = queues.get_mut(instrument).and_then(VecDeque::pop_front);
        match next {
            Some(bar) => Ok(Some(bar)),
            None if self.close_when_drained => Err(FeedError::Closed(instrument.to_string())),
            None => Ok(None),
        }
    }
}
