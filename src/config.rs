use serde::Deserialize;
use std::time::Duration;

use crate::api::bybit::{PositionMode, BYBIT_DEMO_API};
use crate::error::BotError;
use crate::execution::OrderSettings;
use crate::risk::RiskPolicy;
use crate::strategy::SignalMode;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RiskPolicyKind {
    #[default]
    Atr,
    Percentage,
}

/// Process-lifetime settings, read once from the environment
///
/// Field names are the lower-cased environment variable names
/// (`TRADING_SYMBOL` → `trading_symbol`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub bybit_api_key: String,
    pub bybit_api_secret: String,
    pub bybit_base_url: String,
    pub position_mode: PositionMode,
    pub price_decimals: usize,

    pub trading_symbol: String,
    pub trade_quantity: f64,
    pub leverage: u32,
    pub trading_interval: String,
    pub trading_limit: usize,

    pub risk_policy: RiskPolicyKind,
    pub atr_period: usize,
    pub atr_multiplier: f64,
    pub risk_ratio: f64,
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,

    pub sr_window: usize,
    pub signal_mode: SignalMode,

    pub cooldown_secs: i64,
    pub maker_offset_pct: f64,
    pub stale_order_secs: i64,
    pub race_poll_secs: u64,
    /// 0 disables the race timeout
    pub race_max_wait_secs: u64,
    pub cycle_interval_secs: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            bybit_api_key: String::new(),
            bybit_api_secret: String::new(),
            bybit_base_url: BYBIT_DEMO_API.to_string(),
            position_mode: PositionMode::OneWay,
            price_decimals: 2,

            trading_symbol: "BTCUSDT".to_string(),
            trade_quantity: 0.03,
            leverage: 10,
            trading_interval: "1".to_string(),
            trading_limit: 100,

            risk_policy: RiskPolicyKind::Atr,
            atr_period: 14,
            atr_multiplier: 1.0,
            risk_ratio: 1.0,
            take_profit_pct: 0.0015,
            stop_loss_pct: 0.0015,

            sr_window: 20,
            signal_mode: SignalMode::Proximity,

            cooldown_secs: 60,
            maker_offset_pct: 0.0001,
            stale_order_secs: 180,
            race_poll_secs: 2,
            race_max_wait_secs: 900,
            cycle_interval_secs: 10,
        }
    }
}

impl BotConfig {
    /// Load from the process environment (call `dotenvy::dotenv()` first)
    pub fn from_env() -> Result<Self> {
        Self::from_environment(config::Environment::default())
    }

    /// Values stay strings until deserialization, so credentials such as
    /// "0123" are never reinterpreted as numbers
    fn from_environment(environment: config::Environment) -> Result<Self> {
        let source = config::Config::builder().add_source(environment).build()?;
        Self::from_config(source)
    }

    pub fn from_config(source: config::Config) -> Result<Self> {
        let config: BotConfig = source.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(BotError::Config(config::ConfigError::Message(msg.to_string())));

        if self.bybit_api_key.is_empty() || self.bybit_api_secret.is_empty() {
            return invalid("BYBIT_API_KEY and BYBIT_API_SECRET must be set");
        }
        if self.trade_quantity <= 0.0 {
            return invalid("TRADE_QUANTITY must be positive");
        }
        if self.sr_window == 0 || self.trading_limit < self.sr_window {
            return invalid("TRADING_LIMIT must cover SR_WINDOW candles");
        }
        if self.risk_policy == RiskPolicyKind::Atr && self.trading_limit < self.atr_period + 1 {
            return invalid("TRADING_LIMIT must cover ATR_PERIOD + 1 candles");
        }
        if self.race_poll_secs == 0 {
            return invalid("RACE_POLL_SECS must be at least 1");
        }
        Ok(())
    }

    pub fn risk(&self) -> RiskPolicy {
        match self.risk_policy {
            RiskPolicyKind::Atr => RiskPolicy::Atr {
                period: self.atr_period,
                multiplier: self.atr_multiplier,
                risk_ratio: self.risk_ratio,
            },
            RiskPolicyKind::Percentage => RiskPolicy::Percentage {
                take_profit_pct: self.take_profit_pct,
                stop_loss_pct: self.stop_loss_pct,
            },
        }
    }

    pub fn order_settings(&self) -> OrderSettings {
        OrderSettings {
            maker_offset_pct: self.maker_offset_pct,
            leverage: self.leverage,
            stale_after_secs: self.stale_order_secs,
            poll_interval: Duration::from_secs(self.race_poll_secs),
            max_race_wait: (self.race_max_wait_secs > 0)
                .then(|| Duration::from_secs(self.race_max_wait_secs)),
        }
    }
}
