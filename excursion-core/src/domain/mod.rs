//! Domain types for the excursion engine

pub mod bar;
pub mod ids;
pub mod outcome;
pub mod record;
pub mod signal;

pub use bar::{Bar, BarRejection};
pub use ids::RunId;
pub use outcome::{Label, OutcomeKind, SimulationResult};
pub use record::SimulationRecord;
pub use signal::{Direction, DroppedField, PartialTakeProfit, TradeSignal};

/// Instrument identifier alias
pub type Instrument = String;
