//! Bar: one completed interval of price action from the feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// OHLC summary of a single completed bar.
///
/// `time` is the bar's close time; the simulator uses it as the observation
/// timestamp for extrema and durations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// Why a bar was refused before it could touch run state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BarRejection {
    #[error("non-finite price in bar")]
    NonFinite,

    #[error("non-positive price in bar")]
    NonPositive,

    #[error("inverted bar: low {low} > high {high}")]
    Inverted { low: f64, high: f64 },

    #[error("price {price} deviates more than {multiple}x from entry {entry}")]
    Deviation { price: f64, entry: f64, multiple: f64 },
}

impl Bar {
    pub fn new(time: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            time,
            open,
            high,
            low,
            close,
        }
    }

    /// Returns true if any OHLC field is NaN or infinite.
    pub fn is_void(&self) -> bool {
        !(self.open.is_finite()
            && self.high.is_finite()
            && self.low.is_finite()
            && self.close.is_finite())
    }

    /// Check the bar against the entry price of the run consuming it.
    ///
    /// A bar passes when all prices are finite and positive, `low <= high`,
    /// and neither extreme strays beyond `max_deviation` times the entry
    /// (above it for the high, below `entry / max_deviation` for the low).
    pub fn validate(&self, entry_price: f64, max_deviation: f64) -> Result<(), BarRejection> {
        if self.is_void() {
            return Err(BarRejection::NonFinite);
        }
        if self.open <= 0.0 || self.high <= 0.0 || self.low <= 0.0 || self.close <= 0.0 {
            return Err(BarRejection::NonPositive);
        }
        if self.low > self.high {
            return Err(BarRejection::Inverted {
                low: self.low,
                high: self.high,
            });
        }
        if self.high > entry_price * max_deviation {
            return Err(BarRejection::Deviation {
                price: self.high,
                entry: entry_price,
                multiple: max_deviation,
            });
        }
        if self.low < entry_price / max_deviation {
            return Err(BarRejection::Deviation {
                price: self.low,
                entry: entry_price,
                multiple: max_deviation,
            });
        }
        Ok(())
    }
}
