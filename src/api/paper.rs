use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::ExchangeClient;
use crate::error::BotError;
use crate::models::{Candle, OpenOrder, OrderRequest, Position, Side};
use crate::Result;

/// In-memory exchange with scripted market data
///
/// Orders rest on the book until they are cancelled or until the poll
/// scheduled with [`PaperExchange::fill_on_poll`], at which point they
/// silently disappear from the open-order listing, the way a fill looks on a
/// real venue.
#[derive(Default)]
pub struct PaperExchange {
    state: Mutex<PaperState>,
}

#[derive(Default)]
struct PaperState {
    candles: Vec<Candle>,
    last_price: Option<f64>,
    positions: Vec<Position>,
    open_orders: Vec<OpenOrder>,
    next_order_id: u64,
    polls: usize,
    scheduled_fills: HashMap<String, usize>,
    failing_from_poll: Option<(usize, String)>,
    rejections: HashMap<Side, String>,
    failures: HashMap<&'static str, String>,
    submitted: Vec<OrderRequest>,
    cancelled: Vec<String>,
    leverage_calls: Vec<u32>,
}

impl PaperExchange {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, PaperState>> {
        self.state
            .lock()
            .map_err(|e| BotError::Decode(format!("paper exchange poisoned: {}", e)))
    }

    fn check_failure(state: &PaperState, operation: &'static str) -> Result<()> {
        match state.failures.get(operation) {
            Some(message) => Err(BotError::Api {
                code: 10016,
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }

    pub fn set_candles(&self, candles: Vec<Candle>) -> Result<()> {
        self.lock()?.candles = candles;
        Ok(())
    }

    pub fn set_last_price(&self, price: f64) -> Result<()> {
        self.lock()?.last_price = Some(price);
        Ok(())
    }

    pub fn set_positions(&self, positions: Vec<Position>) -> Result<()> {
        self.lock()?.positions = positions;
        Ok(())
    }

    /// Put an order on the book as if it had been placed earlier
    pub fn add_open_order(&self, order_id: &str, created_time: DateTime<Utc>) -> Result<()> {
        self.lock()?.open_orders.push(OpenOrder {
            order_id: order_id.to_string(),
            created_time,
        });
        Ok(())
    }

    /// Remove `order_id` from the book on the `nth` open-order poll from now
    pub fn fill_on_poll(&self, order_id: &str, nth: usize) -> Result<()> {
        let mut state = self.lock()?;
        let at = state.polls + nth;
        state.scheduled_fills.insert(order_id.to_string(), at);
        Ok(())
    }

    /// Fail every open-order poll from the `nth` one from now on
    pub fn fail_polls_from(&self, nth: usize, message: &str) -> Result<()> {
        let mut state = self.lock()?;
        let at = state.polls + nth;
        state.failing_from_poll = Some((at, message.to_string()));
        Ok(())
    }

    /// Reject every submission on `side` with `message`
    pub fn reject_side(&self, side: Side, message: &str) -> Result<()> {
        self.lock()?.rejections.insert(side, message.to_string());
        Ok(())
    }

    /// Make an operation (e.g. "fetch_ticker") answer with an API error
    pub fn fail_operation(&self, operation: &'static str, message: &str) -> Result<()> {
        self.lock()?.failures.insert(operation, message.to_string());
        Ok(())
    }

    pub fn submitted(&self) -> Result<Vec<OrderRequest>> {
        Ok(self.lock()?.submitted.clone())
    }

    pub fn cancelled(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.cancelled.clone())
    }

    pub fn open_order_ids(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.open_orders.iter().map(|o| o.order_id.clone()).collect())
    }

    pub fn poll_count(&self) -> Result<usize> {
        Ok(self.lock()?.polls)
    }

    pub fn leverage_calls(&self) -> Result<Vec<u32>> {
        Ok(self.lock()?.leverage_calls.clone())
    }
}

#[async_trait]
impl ExchangeClient for PaperExchange {
    async fn fetch_candles(&self, _symbol: &str, _interval: &str, limit: usize) -> Result<Vec<Candle>> {
        let state = self.lock()?;
        Self::check_failure(&state, "fetch_candles")?;

        let skip = state.candles.len().saturating_sub(limit);
        Ok(state.candles.iter().skip(skip).cloned().collect())
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<f64> {
        let state = self.lock()?;
        Self::check_failure(&state, "fetch_ticker")?;

        state
            .last_price
            .ok_or_else(|| BotError::Decode(format!("no ticker for {}", symbol)))
    }

    async fn fetch_positions(&self, symbol: &str) -> Result<Vec<Position>> {
        let state = self.lock()?;
        Self::check_failure(&state, "fetch_positions")?;

        Ok(state
            .positions
            .iter()
            .filter(|p| p.symbol == symbol)
            .cloned()
            .collect())
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        let mut state = self.lock()?;
        Self::check_failure(&state, "set_leverage")?;

        state.leverage_calls.push(leverage);
        for position in state.positions.iter_mut().filter(|p| p.symbol == symbol) {
            position.leverage = Some(leverage as f64);
        }
        Ok(())
    }

    async fn submit_order(&self, request: &OrderRequest) -> Result<String> {
        let mut state = self.lock()?;
        if let Some(message) = state.rejections.get(&request.side) {
            return Err(BotError::OrderRejected(message.clone()));
        }

        state.next_order_id += 1;
        let order_id = format!("paper-{}", state.next_order_id);
        state.submitted.push(request.clone());
        state.open_orders.push(OpenOrder {
            order_id: order_id.clone(),
            created_time: Utc::now(),
        });
        Ok(order_id)
    }

    async fn fetch_open_orders(&self, _symbol: &str) -> Result<Vec<OpenOrder>> {
        let mut state = self.lock()?;
        Self::check_failure(&state, "fetch_open_orders")?;

        state.polls += 1;
        let poll = state.polls;
        if let Some((at, message)) = &state.failing_from_poll {
            if poll >= *at {
                return Err(BotError::Api {
                    code: 10016,
                    message: message.clone(),
                });
            }
        }
        let filled: Vec<String> = state
            .scheduled_fills
            .iter()
            .filter(|(_, at)| **at <= poll)
            .map(|(id, _)| id.clone())
            .collect();
        for order_id in &filled {
            state.scheduled_fills.remove(order_id);
        }
        state.open_orders.retain(|o| !filled.contains(&o.order_id));

        Ok(state.open_orders.clone())
    }

    async fn cancel_order(&self, _symbol: &str, order_id: &str) -> Result<()> {
        let mut state = self.lock()?;
        Self::check_failure(&state, "cancel_order")?;

        let before = state.open_orders.len();
        state.open_orders.retain(|o| o.order_id != order_id);
        if state.open_orders.len() == before {
            return Err(BotError::Api {
                code: 110001,
                message: format!("order {} does not exist", order_id),
            });
        }
        state.cancelled.push(order_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(side: Side) -> OrderRequest {
        OrderRequest {
            symbol: "BTCUSDT".to_string(),
            side,
            quantity: 0.01,
            price: 100.0,
            stop_loss: None,
            take_profit: None,
        }
    }

    #[tokio::test]
    async fn test_scheduled_fill_removes_order() {
        let exchange = PaperExchange::new();
        let id = exchange.submit_order(&request(Side::Long)).await.unwrap();
        exchange.fill_on_poll(&id, 2).unwrap();

        assert_eq!(exchange.fetch_open_orders("BTCUSDT").await.unwrap().len(), 1);
        assert!(exchange.fetch_open_orders("BTCUSDT").await.unwrap().is_empty());
        assert!(exchange.cancelled().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_polls_fail_from_chosen_poll() {
        let exchange = PaperExchange::new();
        exchange.submit_order(&request(Side::Long)).await.unwrap();
        exchange.fail_polls_from(2, "timeout").unwrap();

        assert!(exchange.fetch_open_orders("BTCUSDT").await.is_ok());
        assert!(exchange.fetch_open_orders("BTCUSDT").await.is_err());
        assert!(exchange.fetch_open_orders("BTCUSDT").await.is_err());
        assert_eq!(exchange.open_order_ids().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_unknown_order_fails() {
        let exchange = PaperExchange::new();

        let result = exchange.cancel_order("BTCUSDT", "missing").await;
        assert!(matches!(result, Err(BotError::Api { code: 110001, .. })));
    }

    #[tokio::test]
    async fn test_rejected_side() {
        let exchange = PaperExchange::new();
        exchange.reject_side(Side::Short, "insufficient margin").unwrap();

        assert!(exchange.submit_order(&request(Side::Long)).await.is_ok());
        assert!(matches!(
            exchange.submit_order(&request(Side::Short)).await,
            Err(BotError::OrderRejected(_))
        ));
    }
}
