/// Stop ratchet for a simulated position.
///
/// **Core Rule:** the active stop may tighten, never loosen.
///
/// A trailing proposal is accepted only when it is strictly more favorable to
/// the holder than the current stop; everything else leaves the level alone.
use crate::domain::Direction;

/// Active stop-loss level with the one-way tightening rule.
///
/// - Long positions: the stop can only rise
/// - Short positions: the stop can only fall
#[derive(Debug, Clone, PartialEq)]
pub struct StopRatchet {
    /// Current stop level (low-water mark for shorts, high-water mark for longs)
    level: Option<f64>,

    direction: Direction,
}

impl StopRatchet {
    /// Ratchet with no stop yet; the first proposal sets it.
    pub fn new(direction: Direction) -> Self {
        Self {
            level: None,
            direction,
        }
    }

    /// Ratchet seeded from the signal's protective stop, if any.
    pub fn with_initial_level(direction: Direction, level: Option<f64>) -> Self {
        Self { level, direction }
    }

    /// Propose a new stop level.
    ///
    /// Returns `true` if the stop moved. Non-finite proposals are ignored.
    ///
    /// # Example
    /// ```
    /// use excursion_core::domain::Direction;
    /// use excursion_core::simulator::StopRatchet;
    ///
    /// let mut stop = StopRatchet::with_initial_level(Direction::Long, Some(95.0));
    ///
    /// // Tightening: 95 → 100 (allowed)
    /// assert!(stop.propose(100.0));
    ///
    /// // Loosening: 100 → 90 (blocked, stays at 100)
    /// assert!(!stop.propose(90.0));
    /// assert_eq!(stop.level(), Some(100.0));
    /// ```
    pub fn propose(&mut self, proposed: f64) -> bool {
        if !proposed.is_finite() {
            return false;
        }
        let tighter = match self.level {
            None => true,
            Some(current) => self.direction.is_more_favorable(proposed, current),
        };
        if tighter {
            self.level = Some(proposed);
        }
        tighter
    }

    pub fn level(&self) -> Option<f64> {
        self.level
    }

    /// True if the bar's range reaches the stop.
    pub fn is_touched(&self, high: f64, low: f64) -> bool {
        match (self.level, self.direction) {
            (Some(stop), Direction::Long) => low <= stop,
            (Some(stop), Direction::Short) => high >= stop,
            (None, _) => false,
        }
    }
}
