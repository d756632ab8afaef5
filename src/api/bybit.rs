use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Sha256;
use std::num::NonZeroU32;
use std::sync::Arc;

use super::ExchangeClient;
use crate::error::BotError;
use crate::models::{Candle, OpenOrder, OrderRequest, Position, Side};
use crate::Result;

// Bybit v5 unified REST API
// Docs: https://bybit-exchange.github.io/docs/v5/intro
pub const BYBIT_DEMO_API: &str = "https://api-demo.bybit.com";
const CATEGORY: &str = "linear";
const RECV_WINDOW: &str = "5000";
const RATE_LIMIT_PER_SEC: u32 = 10;
const LEVERAGE_NOT_MODIFIED: i64 = 110043;

type HmacSha256 = Hmac<Sha256>;

type BybitRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// How the account holds positions; decides `positionIdx` on orders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PositionMode {
    #[default]
    OneWay,
    Hedge,
}

impl PositionMode {
    pub fn position_idx(&self, side: Side) -> u8 {
        match (self, side) {
            (PositionMode::OneWay, _) => 0,
            (PositionMode::Hedge, Side::Long) => 1,
            (PositionMode::Hedge, Side::Short) => 2,
        }
    }
}

#[derive(Clone)]
pub struct BybitCredentials {
    pub api_key: String,
    pub api_secret: String,
}

/// Signed client for Bybit linear perpetuals
#[derive(Clone)]
pub struct BybitClient {
    client: Client,
    base_url: String,
    credentials: BybitCredentials,
    position_mode: PositionMode,
    price_decimals: usize,
    rate_limiter: Arc<BybitRateLimiter>,
}

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    ret_code: i64,
    ret_msg: String,
    #[serde(default)]
    result: Value,
}

#[derive(Debug, Deserialize)]
struct ListResult<T> {
    list: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerRaw {
    last_price: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionRaw {
    symbol: String,
    size: String,
    updated_time: String,
    #[serde(default)]
    leverage: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderCreated {
    order_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenOrderRaw {
    order_id: String,
    created_time: String,
}

fn millis_to_datetime(raw: &str) -> Result<DateTime<Utc>> {
    let ms: i64 = raw.parse()?;
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| BotError::Decode(format!("timestamp out of range: {}", raw)))
}

/// Kline row: [startTime, open, high, low, close, volume, turnover]
fn parse_kline_row(row: &[String]) -> Result<Candle> {
    if row.len() < 6 {
        return Err(BotError::Decode(format!("kline row has {} fields", row.len())));
    }
    Ok(Candle {
        timestamp: millis_to_datetime(&row[0])?,
        open: row[1].parse()?,
        high: row[2].parse()?,
        low: row[3].parse()?,
        close: row[4].parse()?,
        volume: row[5].parse()?,
    })
}

impl TryFrom<PositionRaw> for Position {
    type Error = BotError;

    fn try_from(raw: PositionRaw) -> Result<Self> {
        Ok(Position {
            symbol: raw.symbol,
            size: raw.size.parse()?,
            updated_time: millis_to_datetime(&raw.updated_time)?,
            leverage: raw.leverage.parse().ok(),
        })
    }
}

/// HMAC-SHA256 of `timestamp + api_key + recv_window + payload`, hex encoded
pub fn sign_request(secret: &str, timestamp: &str, api_key: &str, recv_window: &str, payload: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| BotError::Decode(format!("invalid signing key: {}", e)))?;
    mac.update(timestamp.as_bytes());
    mac.update(api_key.as_bytes());
    mac.update(recv_window.as_bytes());
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

impl BybitClient {
    pub fn new(
        credentials: BybitCredentials,
        base_url: impl Into<String>,
        position_mode: PositionMode,
        price_decimals: usize,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;

        let per_second = NonZeroU32::new(RATE_LIMIT_PER_SEC).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(per_second)));

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            position_mode,
            price_decimals,
            rate_limiter,
        })
    }

    fn timestamp() -> String {
        Utc::now().timestamp_millis().to_string()
    }

    fn format_price(&self, price: f64) -> String {
        format!("{:.*}", self.price_decimals, price)
    }

    /// Check the envelope and return the raw `result` object
    async fn read_envelope(response: reqwest::Response) -> Result<Value> {
        let envelope: Envelope = response.json().await?;
        if envelope.ret_code != 0 {
            return Err(BotError::Api {
                code: envelope.ret_code,
                message: envelope.ret_msg,
            });
        }
        Ok(envelope.result)
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: &str, params: &[(&str, String)]) -> Result<T> {
        self.rate_limiter.until_ready().await;

        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        let timestamp = Self::timestamp();
        let signature = sign_request(
            &self.credentials.api_secret,
            &timestamp,
            &self.credentials.api_key,
            RECV_WINDOW,
            &query,
        )?;

        let url = format!("{}{}?{}", self.base_url, endpoint, query);
        tracing::debug!(%url, "GET");

        let response = self
            .client
            .get(&url)
            .header("X-BAPI-API-KEY", &self.credentials.api_key)
            .header("X-BAPI-TIMESTAMP", &timestamp)
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW)
            .header("X-BAPI-SIGN", signature)
            .send()
            .await?;

        let result = Self::read_envelope(response).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn post(&self, endpoint: &str, body: Value) -> Result<Value> {
        self.rate_limiter.until_ready().await;

        let payload = body.to_string();
        let timestamp = Self::timestamp();
        let signature = sign_request(
            &self.credentials.api_secret,
            &timestamp,
            &self.credentials.api_key,
            RECV_WINDOW,
            &payload,
        )?;

        let url = format!("{}{}", self.base_url, endpoint);
        tracing::debug!(%url, body = %payload, "POST");

        let response = self
            .client
            .post(&url)
            .header("X-BAPI-API-KEY", &self.credentials.api_key)
            .header("X-BAPI-TIMESTAMP", &timestamp)
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW)
            .header("X-BAPI-SIGN", signature)
            .header("Content-Type", "application/json")
            .body(payload)
            .send()
            .await?;

        Self::read_envelope(response).await
    }
}

#[async_trait]
impl ExchangeClient for BybitClient {
    async fn fetch_candles(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>> {
        let result: ListResult<Vec<String>> = self
            .get(
                "/v5/market/kline",
                &[
                    ("category", CATEGORY.to_string()),
                    ("symbol", symbol.to_string()),
                    ("interval", interval.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        result.list.iter().map(|row| parse_kline_row(row)).collect()
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<f64> {
        let result: ListResult<TickerRaw> = self
            .get(
                "/v5/market/tickers",
                &[("category", CATEGORY.to_string()), ("symbol", symbol.to_string())],
            )
            .await?;

        let ticker = result
            .list
            .first()
            .ok_or_else(|| BotError::Decode(format!("no ticker for {}", symbol)))?;
        Ok(ticker.last_price.parse()?)
    }

    async fn fetch_positions(&self, symbol: &str) -> Result<Vec<Position>> {
        let result: ListResult<PositionRaw> = self
            .get(
                "/v5/position/list",
                &[("category", CATEGORY.to_string()), ("symbol", symbol.to_string())],
            )
            .await?;

        result.list.into_iter().map(Position::try_from).collect()
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        let body = json!({
            "category": CATEGORY,
            "symbol": symbol,
            "buyLeverage": leverage.to_string(),
            "sellLeverage": leverage.to_string(),
        });

        match self.post("/v5/position/set-leverage", body).await {
            Ok(_) => Ok(()),
            Err(BotError::Api { code, .. }) if code == LEVERAGE_NOT_MODIFIED => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn submit_order(&self, request: &OrderRequest) -> Result<String> {
        let mut body = json!({
            "category": CATEGORY,
            "symbol": request.symbol,
            "side": request.side.as_order_side(),
            "orderType": "Limit",
            "qty": request.quantity.to_string(),
            "price": self.format_price(request.price),
            "positionIdx": self.position_mode.position_idx(request.side),
            "orderLinkId": uuid::Uuid::new_v4().to_string(),
        });
        if let Some(stop_loss) = request.stop_loss {
            body["stopLoss"] = Value::String(self.format_price(stop_loss));
        }
        if let Some(take_profit) = request.take_profit {
            body["takeProfit"] = Value::String(self.format_price(take_profit));
        }

        let result = match self.post("/v5/order/create", body).await {
            Ok(result) => result,
            Err(BotError::Api { message, .. }) => return Err(BotError::OrderRejected(message)),
            Err(e) => return Err(e),
        };

        let created: OrderCreated = serde_json::from_value(result)?;
        Ok(created.order_id)
    }

    async fn fetch_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>> {
        let result: ListResult<OpenOrderRaw> = self
            .get(
                "/v5/order/realtime",
                &[("category", CATEGORY.to_string()), ("symbol", symbol.to_string())],
            )
            .await?;

        result
            .list
            .into_iter()
            .map(|raw| {
                Ok(OpenOrder {
                    created_time: millis_to_datetime(&raw.created_time)?,
                    order_id: raw.order_id,
                })
            })
            .collect()
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()> {
        let body = json!({
            "category": CATEGORY,
            "symbol": symbol,
            "orderId": order_id,
        });
        self.post("/v5/order/cancel", body).await?;
        Ok(())
    }
}
