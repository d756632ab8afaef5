// Technical indicators module
// Volatility (ATR) used to size stop distances

pub mod atr;

pub use atr::{calculate_atr, true_range};
