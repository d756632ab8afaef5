use chrono::Utc;
use std::sync::Arc;

use super::{
    GateDecision, LifecycleEvent, MarketSeries, OrderLifecycleManager, OrderSettings, PositionGate,
    RaceOutcome,
};
use crate::api::ExchangeClient;
use crate::config::BotConfig;
use crate::error::BotError;
use crate::models::{OrderIntent, RiskDistance, Side, TrackedOrder};
use crate::risk::{RiskCalculator, RiskPolicy};
use crate::strategy::{Signal, SignalDetector, SignalMode, SrLevels, Strategy};
use crate::Result;

/// Static per-process trading parameters
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub symbol: String,
    pub quantity: f64,
    pub interval: String,
    pub limit: usize,
}

/// What one cycle did
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Skipped(GateDecision),
    NoSignal { levels: SrLevels, price: f64 },
    Placed { order: TrackedOrder, risk: RiskDistance },
    /// One side of a dual placement failed; the other stays live until a
    /// later gate check or stale sweep deals with it
    PartiallyPlaced {
        order: TrackedOrder,
        failed_side: Side,
        reason: String,
    },
    Raced(RaceOutcome),
    /// Both race orders vanished on the same poll; nothing was cancelled
    RaceAmbiguous { first: String, second: String },
}

/// Gate → data → signal → risk → orders, once per call
pub struct TradingEngine<E: ExchangeClient> {
    exchange: Arc<E>,
    gate: PositionGate,
    orders: OrderLifecycleManager<E>,
    detector: SignalDetector,
    risk: RiskCalculator,
    settings: EngineSettings,
}

impl<E: ExchangeClient> TradingEngine<E> {
    pub fn new(
        exchange: Arc<E>,
        settings: EngineSettings,
        cooldown_secs: i64,
        order_settings: OrderSettings,
        detector: SignalDetector,
        risk_policy: RiskPolicy,
    ) -> Self {
        Self {
            gate: PositionGate::new(settings.symbol.clone(), cooldown_secs),
            orders: OrderLifecycleManager::new(exchange.clone(), settings.symbol.clone(), order_settings),
            exchange,
            detector,
            risk: RiskCalculator::new(risk_policy),
            settings,
        }
    }

    pub fn from_config(exchange: Arc<E>, config: &BotConfig) -> Self {
        Self::new(
            exchange,
            EngineSettings {
                symbol: config.trading_symbol.clone(),
                quantity: config.trade_quantity,
                interval: config.trading_interval.clone(),
                limit: config.trading_limit,
            },
            config.cooldown_secs,
            config.order_settings(),
            SignalDetector::new(config.sr_window, config.signal_mode),
            config.risk(),
        )
    }

    /// Swap in a different detector (e.g. one with a trend source)
    pub fn with_detector(mut self, detector: SignalDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn mode(&self) -> SignalMode {
        self.detector.mode()
    }

    fn intent(&self, side: Side, entry: f64, risk: &RiskDistance) -> OrderIntent {
        OrderIntent {
            symbol: self.settings.symbol.clone(),
            side,
            quantity: self.settings.quantity,
            limit_price: entry,
            stop_loss: Some(risk.stop_loss),
            take_profit: Some(risk.take_profit),
        }
    }

    /// One full cycle; exchange failures come back as errors
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        let decision = self.gate.allow(self.exchange.as_ref(), &self.orders, Utc::now()).await?;
        if !decision.is_admitted() {
            return Ok(CycleOutcome::Skipped(decision));
        }

        let candles = self
            .exchange
            .fetch_candles(&self.settings.symbol, &self.settings.interval, self.settings.limit)
            .await?;
        let series = MarketSeries::from_candles(candles, self.settings.limit);
        let needed = self
            .detector
            .min_candles_required()
            .max(self.risk.min_candles_required());
        if series.len() < needed {
            return Err(BotError::InsufficientData {
                needed,
                available: series.len(),
            });
        }

        let price = self.exchange.fetch_ticker(&self.settings.symbol).await?;
        let levels = self.detector.levels(&series)?;

        match self.detector.decide(&levels, price, &series)? {
            Signal::Hold => Ok(CycleOutcome::NoSignal { levels, price }),
            Signal::Enter { side, entry } => {
                let risk = self.risk.calculate(&series, entry, side)?;
                let order = self.orders.place_order(&self.intent(side, entry, &risk)).await?;
                Ok(CycleOutcome::Placed { order, risk })
            }
            Signal::Race {
                long_entry,
                short_entry,
            } => self.run_race(&series, long_entry, short_entry).await,
        }
    }

    async fn run_race(&self, series: &MarketSeries, long_entry: f64, short_entry: f64) -> Result<CycleOutcome> {
        let long_risk = self.risk.calculate(series, long_entry, Side::Long)?;
        let short_risk = self.risk.calculate(series, short_entry, Side::Short)?;

        let long = self
            .orders
            .place_order(&self.intent(Side::Long, long_entry, &long_risk))
            .await;
        let short = self
            .orders
            .place_order(&self.intent(Side::Short, short_entry, &short_risk))
            .await;

        let (long, short) = match (long, short) {
            (Ok(long), Ok(short)) => (long, short),
            (Ok(order), Err(e)) => {
                return Ok(CycleOutcome::PartiallyPlaced {
                    order,
                    failed_side: Side::Short,
                    reason: e.to_string(),
                })
            }
            (Err(e), Ok(order)) => {
                return Ok(CycleOutcome::PartiallyPlaced {
                    order,
                    failed_side: Side::Long,
                    reason: e.to_string(),
                })
            }
            (Err(e), Err(_)) => return Err(e),
        };

        match self.orders.race_fill(long, short).await {
            Ok(outcome) => Ok(CycleOutcome::Raced(outcome)),
            Err(BotError::RaceAmbiguous { first, second }) => {
                Ok(CycleOutcome::RaceAmbiguous { first, second })
            }
            Err(e) => Err(e),
        }
    }

    /// Scheduler entry point: run a cycle, log what happened, never fail
    pub async fn tick(&self) -> Option<CycleOutcome> {
        let result = self.run_cycle().await;

        for event in self.orders.drain_events() {
            log_event(&self.settings.symbol, &event);
        }

        match result {
            Ok(outcome) => {
                log_outcome(&self.settings.symbol, &outcome);
                Some(outcome)
            }
            Err(e) if e.is_exchange_failure() => {
                tracing::warn!(symbol = %self.settings.symbol, error = %e, "Exchange call failed, skipping cycle");
                None
            }
            Err(e) => {
                tracing::error!(symbol = %self.settings.symbol, error = %e, "Cycle aborted");
                None
            }
        }
    }
}

fn log_event(symbol: &str, event: &LifecycleEvent) {
    match event {
        LifecycleEvent::LeverageUnknown { reason } => {
            tracing::warn!(symbol, %reason, "Could not read current leverage")
        }
        LifecycleEvent::LeverageNotSet { leverage, reason } => tracing::warn!(
            symbol,
            leverage,
            %reason,
            "Failed to set leverage, order placed anyway"
        ),
        LifecycleEvent::StaleCancelled { order_id, age_secs } => {
            tracing::info!(symbol, %order_id, age_secs, "Cancelled stale order")
        }
        LifecycleEvent::StaleCancelFailed { order_id, reason } => {
            tracing::warn!(symbol, %order_id, %reason, "Failed to cancel stale order")
        }
        LifecycleEvent::CancelFailed { order_id, reason } => {
            tracing::warn!(symbol, %order_id, %reason, "Cancel failed, order left on the book")
        }
    }
}

fn log_outcome(symbol: &str, outcome: &CycleOutcome) {
    match outcome {
        CycleOutcome::Skipped(GateDecision::Cooldown {
            elapsed_secs,
            cooldown_secs,
        }) => tracing::info!(
            symbol,
            elapsed_secs,
            cooldown_secs,
            "Position closed recently, not placing a new order"
        ),
        CycleOutcome::Skipped(GateDecision::OpenPosition { size }) => {
            tracing::info!(symbol, size, "Position already open, not placing a new order")
        }
        CycleOutcome::Skipped(GateDecision::OpenOrders { count }) => {
            tracing::info!(symbol, count, "Limit order still open, not placing a new order")
        }
        CycleOutcome::Skipped(GateDecision::Admit) => {}
        CycleOutcome::NoSignal { levels, price } => tracing::info!(
            symbol,
            support = levels.support.price,
            resistance = levels.resistance.price,
            price,
            "No suitable signal"
        ),
        CycleOutcome::Placed { order, risk } => tracing::info!(
            symbol,
            order_id = %order.order_id,
            side = %order.side,
            price = order.price,
            stop_loss = risk.stop_loss,
            take_profit = risk.take_profit,
            "Order placed"
        ),
        CycleOutcome::PartiallyPlaced {
            order,
            failed_side,
            reason,
        } => tracing::warn!(
            symbol,
            live_order = %order.order_id,
            %failed_side,
            %reason,
            "Only one side of the race was placed; leaving it for housekeeping"
        ),
        CycleOutcome::Raced(RaceOutcome::Won { winner, loser }) => tracing::info!(
            symbol,
            winner = %winner.order_id,
            side = %winner.side,
            loser = %loser.order_id,
            loser_state = %loser.state,
            "Fill race won"
        ),
        CycleOutcome::Raced(RaceOutcome::Expired { first, second }) => tracing::info!(
            symbol,
            first = %first.order_id,
            second = %second.order_id,
            "Race orders expired unfilled"
        ),
        CycleOutcome::Raced(RaceOutcome::TimedOut { first, second }) => tracing::warn!(
            symbol,
            first = %first.order_id,
            first_state = %first.state,
            second = %second.order_id,
            second_state = %second.state,
            "Race timed out, cancelled both orders"
        ),
        CycleOutcome::RaceAmbiguous { first, second } => tracing::error!(
            symbol,
            %first,
            %second,
            "Both race orders left the book on the same poll; not picking a winner"
        ),
    }
}
