mod market;
mod phase;

pub use market::{distinct_outcomes, victims, MarketRecord, MarketTable, Outcome};
pub use phase::{MarketStatus, Phase, TimerKind};
