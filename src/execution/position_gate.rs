use chrono::{DateTime, Utc};

use super::OrderLifecycleManager;
use crate::api::ExchangeClient;
use crate::models::Position;
use crate::Result;

/// Why a cycle was (not) admitted
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Admit,
    /// A position closed less than `cooldown_secs` ago
    Cooldown { elapsed_secs: i64, cooldown_secs: i64 },
    OpenPosition { size: f64 },
    OpenOrders { count: usize },
}

impl GateDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, GateDecision::Admit)
    }
}

/// Cycle admission: cooldown, then open position, then open orders
#[derive(Debug, Clone)]
pub struct PositionGate {
    symbol: String,
    cooldown_secs: i64,
}

impl PositionGate {
    pub fn new(symbol: impl Into<String>, cooldown_secs: i64) -> Self {
        Self {
            symbol: symbol.into(),
            cooldown_secs,
        }
    }

    /// Most recently updated flat position
    pub fn last_closed<'a>(&self, positions: &'a [Position]) -> Option<&'a Position> {
        positions
            .iter()
            .filter(|p| p.symbol == self.symbol && p.size == 0.0)
            .max_by_key(|p| p.updated_time)
    }

    /// Reject while `now - last close < cooldown`; admits exactly at the threshold
    pub fn check_cooldown(&self, positions: &[Position], now: DateTime<Utc>) -> Option<GateDecision> {
        let last_closed = self.last_closed(positions)?;
        let elapsed_secs = (now - last_closed.updated_time).num_seconds();

        if elapsed_secs < self.cooldown_secs {
            Some(GateDecision::Cooldown {
                elapsed_secs,
                cooldown_secs: self.cooldown_secs,
            })
        } else {
            None
        }
    }

    pub fn check_open_position(&self, positions: &[Position]) -> Option<GateDecision> {
        positions
            .iter()
            .find(|p| p.symbol == self.symbol && p.is_open())
            .map(|p| GateDecision::OpenPosition { size: p.size })
    }

    /// Run the three gates against live exchange state, stopping at the first rejection
    ///
    /// Positions are fetched once and serve both position gates; the
    /// open-order fetch (and with it the stale sweep) only happens when those
    /// pass.
    pub async fn allow<E: ExchangeClient>(
        &self,
        exchange: &E,
        orders: &OrderLifecycleManager<E>,
        now: DateTime<Utc>,
    ) -> Result<GateDecision> {
        let positions = exchange.fetch_positions(&self.symbol).await?;

        if let Some(rejection) = self.check_cooldown(&positions, now) {
            return Ok(rejection);
        }
        if let Some(rejection) = self.check_open_position(&positions) {
            return Ok(rejection);
        }

        let snapshot = orders.fetch_open_orders(now).await?;
        if !snapshot.open.is_empty() {
            return Ok(GateDecision::OpenOrders {
                count: snapshot.open.len(),
            });
        }

        Ok(GateDecision::Admit)
    }
}
