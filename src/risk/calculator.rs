use serde::{Deserialize, Serialize};

use crate::execution::MarketSeries;
use crate::models::{RiskDistance, Side};
use crate::Result;

/// Fraction a misplaced stop (or target) is pushed past the limit price
pub const STOP_NUDGE_PCT: f64 = 0.005;

/// How stop-loss and take-profit distances are derived
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum RiskPolicy {
    /// Stop at `multiplier × ATR(period)`, target at `risk_ratio` times that
    Atr {
        period: usize,
        multiplier: f64,
        risk_ratio: f64,
    },
    /// Fixed fractions of the entry price (0.0015 = 0.15%)
    Percentage {
        take_profit_pct: f64,
        stop_loss_pct: f64,
    },
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self::Atr {
            period: 14,
            multiplier: 1.5,
            risk_ratio: 2.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RiskCalculator {
    policy: RiskPolicy,
}

impl RiskCalculator {
    pub fn new(policy: RiskPolicy) -> Self {
        Self { policy }
    }

    /// Candles the policy needs before it can produce distances
    pub fn min_candles_required(&self) -> usize {
        match self.policy {
            RiskPolicy::Atr { period, .. } => period + 1,
            RiskPolicy::Percentage { .. } => 0,
        }
    }

    /// Stop-loss / take-profit for an entry at `entry_price`
    ///
    /// Fails with `InsufficientData` when the ATR policy has fewer than
    /// `period + 1` candles to work with.
    pub fn calculate(&self, series: &MarketSeries, entry_price: f64, side: Side) -> Result<RiskDistance> {
        let distance = match self.policy {
            RiskPolicy::Atr {
                period,
                multiplier,
                risk_ratio,
            } => {
                let atr = series.average_true_range(period)?;
                atr_distance(entry_price, side, multiplier * atr, risk_ratio)
            }
            RiskPolicy::Percentage {
                take_profit_pct,
                stop_loss_pct,
            } => percentage_distance(entry_price, side, take_profit_pct, stop_loss_pct),
        };

        Ok(enforce_sides(entry_price, side, distance))
    }

    /// Same as `calculate` but with the direction given as text (long/short)
    pub fn calculate_for(&self, series: &MarketSeries, entry_price: f64, direction: &str) -> Result<RiskDistance> {
        let side: Side = direction.parse()?;
        self.calculate(series, entry_price, side)
    }
}

/// ATR policy arithmetic with an already computed stop distance
pub fn atr_distance(entry_price: f64, side: Side, stop_distance: f64, risk_ratio: f64) -> RiskDistance {
    match side {
        Side::Long => RiskDistance {
            stop_loss: entry_price - stop_distance,
            take_profit: entry_price + stop_distance * risk_ratio,
        },
        Side::Short => RiskDistance {
            stop_loss: entry_price + stop_distance,
            take_profit: entry_price - stop_distance * risk_ratio,
        },
    }
}

pub fn percentage_distance(entry_price: f64, side: Side, take_profit_pct: f64, stop_loss_pct: f64) -> RiskDistance {
    match side {
        Side::Long => RiskDistance {
            stop_loss: entry_price * (1.0 - stop_loss_pct),
            take_profit: entry_price * (1.0 + take_profit_pct),
        },
        Side::Short => RiskDistance {
            stop_loss: entry_price * (1.0 + stop_loss_pct),
            take_profit: entry_price * (1.0 - take_profit_pct),
        },
    }
}

/// Move a stop that sits on the wrong side of `limit_price` to 0.5% past it
///
/// A long stop must be strictly below the limit, a short stop strictly above.
pub fn adjust_stop_for_limit(side: Side, limit_price: f64, stop_loss: f64) -> f64 {
    match side {
        Side::Long if stop_loss >= limit_price => limit_price * (1.0 - STOP_NUDGE_PCT),
        Side::Short if stop_loss <= limit_price => limit_price * (1.0 + STOP_NUDGE_PCT),
        _ => stop_loss,
    }
}

fn adjust_target_for_limit(side: Side, limit_price: f64, take_profit: f64) -> f64 {
    match side {
        Side::Long if take_profit <= limit_price => limit_price * (1.0 + STOP_NUDGE_PCT),
        Side::Short if take_profit >= limit_price => limit_price * (1.0 - STOP_NUDGE_PCT),
        _ => take_profit,
    }
}

fn enforce_sides(entry_price: f64, side: Side, distance: RiskDistance) -> RiskDistance {
    RiskDistance {
        stop_loss: adjust_stop_for_limit(side, entry_price, distance.stop_loss),
        take_profit: adjust_target_for_limit(side, entry_price, distance.take_profit),
    }
}
