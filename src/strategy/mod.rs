// Trading strategy module
pub mod support_resistance;

use crate::execution::MarketSeries;
use crate::models::Side;
use crate::Result;

pub use support_resistance::{SignalDetector, SignalMode, SrLevels, PROXIMITY_THRESHOLD};

/// What a strategy wants the engine to do this cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Signal {
    /// One directional limit order at `entry`
    Enter { side: Side, entry: f64 },
    /// Long at `long_entry` and short at `short_entry`; first fill wins
    Race { long_entry: f64, short_entry: f64 },
    Hold,
}

/// Market bias from a longer lookback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Long,
    Short,
    Neutral,
}

impl Trend {
    /// Neutral admits both sides
    pub fn allows(&self, side: Side) -> bool {
        match self {
            Trend::Neutral => true,
            Trend::Long => side == Side::Long,
            Trend::Short => side == Side::Short,
        }
    }
}

/// Independently specified trend input for proximity mode
pub trait TrendSource: Send + Sync {
    fn trend(&self, series: &MarketSeries) -> Result<Trend>;
}

/// Base trait for all trading strategies
pub trait Strategy: Send + Sync {
    /// Generate a trading signal from market data and the live price
    fn generate_signal(&self, series: &MarketSeries, current_price: f64) -> Result<Signal>;

    /// Get strategy name
    fn name(&self) -> &str;

    /// Minimum candles required for this strategy
    fn min_candles_required(&self) -> usize;
}
