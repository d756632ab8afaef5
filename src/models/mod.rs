use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::BotError;

/// OHLCV candlestick, immutable once received
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Trade direction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// Bybit order side string
    pub fn as_order_side(&self) -> &'static str {
        match self {
            Side::Long => "Buy",
            Side::Short => "Sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

impl FromStr for Side {
    type Err = BotError;

    /// Accepts both trend words (long/short) and order sides (buy/sell)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "long" | "buy" => Ok(Side::Long),
            "short" | "sell" => Ok(Side::Short),
            other => Err(BotError::InvalidDirection(other.to_string())),
        }
    }
}

/// Support or resistance price, with the window that produced it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Level {
    pub price: f64,
    pub window: usize,
}

/// Stop-loss / take-profit pair for one entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskDistance {
    pub stop_loss: f64,
    pub take_profit: f64,
}

/// What the engine wants to submit
#[derive(Debug, Clone, PartialEq)]
pub struct OrderIntent {
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub limit_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

/// Wire-level order after maker offset and stop adjustment
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderState {
    Submitted,
    Open,
    Filled,
    Cancelled,
    StaleCancelled,
}

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Cancelled | OrderState::StaleCancelled
        )
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrderState::Submitted => "submitted",
            OrderState::Open => "open",
            OrderState::Filled => "filled",
            OrderState::Cancelled => "cancelled",
            OrderState::StaleCancelled => "stale-cancelled",
        };
        write!(f, "{}", name)
    }
}

/// An order the engine submitted, known only by its exchange id
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedOrder {
    pub order_id: String,
    pub side: Side,
    pub price: f64,
    pub created_at: DateTime<Utc>,
    pub state: OrderState,
}

impl TrackedOrder {
    /// Record for an acknowledged submission
    pub fn acknowledged(order_id: String, side: Side, price: f64, created_at: DateTime<Utc>) -> Self {
        Self {
            order_id,
            side,
            price,
            created_at,
            state: OrderState::Open,
        }
    }

    /// Consume the record and move it to `next`; terminal records never move again
    pub fn transition(self, next: OrderState) -> Result<Self, BotError> {
        if self.state.is_terminal() || next == OrderState::Submitted {
            return Err(BotError::InvalidTransition {
                order_id: self.order_id,
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        Ok(Self { state: next, ..self })
    }
}

/// Entry in the exchange's open-order listing
#[derive(Debug, Clone, PartialEq)]
pub struct OpenOrder {
    pub order_id: String,
    pub created_time: DateTime<Utc>,
}

impl OpenOrder {
    /// Age at `now`, sub-second precision kept
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_time
    }
}

/// Read-only projection of an exchange position
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub size: f64,
    pub updated_time: DateTime<Utc>,
    pub leverage: Option<f64>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.size > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_parsing() {
        assert_eq!("long".parse::<Side>().unwrap(), Side::Long);
        assert_eq!("Sell".parse::<Side>().unwrap(), Side::Short);
        assert!(matches!(
            "neutral".parse::<Side>(),
            Err(BotError::InvalidDirection(_))
        ));
    }

    #[test]
    fn test_tracked_order_lifecycle() {
        let order = TrackedOrder::acknowledged("1".to_string(), Side::Long, 100.0, Utc::now());
        assert_eq!(order.state, OrderState::Open);

        let filled = order.transition(OrderState::Filled).unwrap();
        assert_eq!(filled.state, OrderState::Filled);

        // Terminal records are frozen
        let again = filled.transition(OrderState::Cancelled);
        assert!(matches!(again, Err(BotError::InvalidTransition { .. })));
    }

    #[test]
    fn test_position_open_flag() {
        let position = Position {
            symbol: "BTCUSDT".to_string(),
            size: 0.0,
            updated_time: Utc::now(),
            leverage: Some(10.0),
        };
        assert!(!position.is_open());
    }
}
