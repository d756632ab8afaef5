// Risk management module
pub mod calculator;

pub use calculator::{adjust_stop_for_limit, RiskCalculator, RiskPolicy, STOP_NUDGE_PCT};
