pub mod bybit;
pub mod paper;

use async_trait::async_trait;

use crate::models::{Candle, OpenOrder, OrderRequest, Position};
use crate::Result;

pub use bybit::{BybitClient, BybitCredentials, PositionMode};
pub use paper::PaperExchange;

/// The seven exchange operations the engine depends on
///
/// Every implementation turns a non-success response into an error; callers
/// never see a half-decoded payload.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Candles for `symbol`, in whatever order the venue returns them
    async fn fetch_candles(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>>;

    /// Last traded price
    async fn fetch_ticker(&self, symbol: &str) -> Result<f64>;

    /// Every position row for `symbol`, open (size > 0) and flat
    async fn fetch_positions(&self, symbol: &str) -> Result<Vec<Position>>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()>;

    /// Submit a limit order, returning the exchange order id
    async fn submit_order(&self, request: &OrderRequest) -> Result<String>;

    async fn fetch_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()>;
}
