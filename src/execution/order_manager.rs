use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::api::ExchangeClient;
use crate::error::BotError;
use crate::models::{OpenOrder, OrderIntent, OrderRequest, OrderState, Side, TrackedOrder};
use crate::risk::adjust_stop_for_limit;
use crate::Result;

/// Knobs for placement, polling and housekeeping
#[derive(Debug, Clone)]
pub struct OrderSettings {
    /// Fraction the limit price is moved away from the market (0.0001 = 0.01%)
    pub maker_offset_pct: f64,
    pub leverage: u32,
    /// Orders older than this are cancelled on every open-order fetch
    pub stale_after_secs: i64,
    pub poll_interval: Duration,
    /// Upper bound on a fill race; `None` waits forever
    pub max_race_wait: Option<Duration>,
}

impl Default for OrderSettings {
    fn default() -> Self {
        Self {
            maker_offset_pct: 0.0001,
            leverage: 10,
            stale_after_secs: 180,
            poll_interval: Duration::from_secs(2),
            max_race_wait: Some(Duration::from_secs(900)),
        }
    }
}

/// Result of one open-order fetch after the stale sweep ran
#[derive(Debug, Clone, Default)]
pub struct OpenOrdersSnapshot {
    /// Orders still resting on the book
    pub open: Vec<OpenOrder>,
    /// Ids this fetch cancelled for being too old
    pub swept: Vec<String>,
}

impl OpenOrdersSnapshot {
    pub fn contains(&self, order_id: &str) -> bool {
        self.open.iter().any(|o| o.order_id == order_id)
    }

    pub fn was_swept(&self, order_id: &str) -> bool {
        self.swept.iter().any(|id| id == order_id)
    }
}

/// How a two-order fill race ended
#[derive(Debug, Clone, PartialEq)]
pub enum RaceOutcome {
    /// One order filled; the other was cancelled (state stays `Open` if the
    /// cancel itself failed)
    Won { winner: TrackedOrder, loser: TrackedOrder },
    /// Housekeeping cancelled the race before anything filled
    Expired { first: TrackedOrder, second: TrackedOrder },
    /// Maximum wait elapsed; both orders were cancelled
    TimedOut { first: TrackedOrder, second: TrackedOrder },
}

/// Housekeeping that happened while placing or watching orders
///
/// Recorded instead of logged; the cycle driver drains and reports them.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    LeverageUnknown { reason: String },
    LeverageNotSet { leverage: u32, reason: String },
    StaleCancelled { order_id: String, age_secs: f64 },
    StaleCancelFailed { order_id: String, reason: String },
    CancelFailed { order_id: String, reason: String },
}

/// Move the limit price away from the market so the order rests as a maker
pub fn maker_price(side: Side, price: f64, offset_pct: f64) -> f64 {
    match side {
        Side::Long => price * (1.0 - offset_pct),
        Side::Short => price * (1.0 + offset_pct),
    }
}

/// Orders whose age strictly exceeds `max_age_secs`, fractions of a second included
pub fn stale_orders(orders: &[OpenOrder], now: DateTime<Utc>, max_age_secs: i64) -> Vec<&OpenOrder> {
    let max_age = ChronoDuration::seconds(max_age_secs);
    orders.iter().filter(|o| o.age(now) > max_age).collect()
}

/// Places orders, watches them and cleans up after them
pub struct OrderLifecycleManager<E: ExchangeClient> {
    exchange: Arc<E>,
    symbol: String,
    settings: OrderSettings,
    events: Mutex<Vec<LifecycleEvent>>,
}

impl<E: ExchangeClient> OrderLifecycleManager<E> {
    pub fn new(exchange: Arc<E>, symbol: impl Into<String>, settings: OrderSettings) -> Self {
        Self {
            exchange,
            symbol: symbol.into(),
            settings,
            events: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, event: LifecycleEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    /// Take every event recorded since the last drain, oldest first
    pub fn drain_events(&self) -> Vec<LifecycleEvent> {
        match self.events.lock() {
            Ok(mut events) => std::mem::take(&mut *events),
            Err(_) => Vec::new(),
        }
    }

    /// Set leverage only when the exchange reports a different value
    ///
    /// A failed change is recorded and never blocks the order.
    async fn ensure_leverage(&self) {
        let current = match self.exchange.fetch_positions(&self.symbol).await {
            Ok(positions) => positions.iter().find_map(|p| p.leverage),
            Err(e) => {
                self.record(LifecycleEvent::LeverageUnknown { reason: e.to_string() });
                None
            }
        };

        if current == Some(self.settings.leverage as f64) {
            return;
        }

        if let Err(e) = self.exchange.set_leverage(&self.symbol, self.settings.leverage).await {
            self.record(LifecycleEvent::LeverageNotSet {
                leverage: self.settings.leverage,
                reason: e.to_string(),
            });
        }
    }

    /// Turn an intent into the request actually sent to the exchange
    pub fn build_request(&self, intent: &OrderIntent) -> OrderRequest {
        let price = maker_price(intent.side, intent.limit_price, self.settings.maker_offset_pct);
        let stop_loss = intent
            .stop_loss
            .map(|stop| adjust_stop_for_limit(intent.side, price, stop));

        OrderRequest {
            symbol: intent.symbol.clone(),
            side: intent.side,
            quantity: intent.quantity,
            price,
            stop_loss,
            take_profit: intent.take_profit,
        }
    }

    /// Submit one limit order with its brackets attached
    ///
    /// Fails with `OrderRejected` carrying the exchange message.
    pub async fn place_order(&self, intent: &OrderIntent) -> Result<TrackedOrder> {
        self.ensure_leverage().await;

        let request = self.build_request(intent);
        let order_id = match self.exchange.submit_order(&request).await {
            Ok(id) => id,
            Err(BotError::Api { message, .. }) => return Err(BotError::OrderRejected(message)),
            Err(e) => return Err(e),
        };

        Ok(TrackedOrder::acknowledged(
            order_id,
            request.side,
            request.price,
            Utc::now(),
        ))
    }

    /// Cancel every order in `orders` older than the stale threshold
    ///
    /// Returns the ids that were cancelled; failed cancels are recorded and
    /// left for the next sweep.
    pub async fn sweep_stale_orders(&self, orders: &[OpenOrder], now: DateTime<Utc>) -> Vec<String> {
        let mut swept = Vec::new();

        for order in stale_orders(orders, now, self.settings.stale_after_secs) {
            match self.exchange.cancel_order(&self.symbol, &order.order_id).await {
                Ok(()) => {
                    self.record(LifecycleEvent::StaleCancelled {
                        order_id: order.order_id.clone(),
                        age_secs: order.age(now).num_milliseconds() as f64 / 1000.0,
                    });
                    swept.push(order.order_id.clone());
                }
                Err(e) => self.record(LifecycleEvent::StaleCancelFailed {
                    order_id: order.order_id.clone(),
                    reason: e.to_string(),
                }),
            }
        }

        swept
    }

    /// Fetch the open-order list; the stale sweep always runs as part of it
    pub async fn fetch_open_orders(&self, now: DateTime<Utc>) -> Result<OpenOrdersSnapshot> {
        let orders = self.exchange.fetch_open_orders(&self.symbol).await?;
        let swept = self.sweep_stale_orders(&orders, now).await;

        let open = orders
            .into_iter()
            .filter(|o| !swept.contains(&o.order_id))
            .collect();

        Ok(OpenOrdersSnapshot { open, swept })
    }

    /// Cancel, but keep the record (still `Open`) if the exchange refuses
    async fn cancel_or_keep(&self, order: TrackedOrder) -> Result<TrackedOrder> {
        match self.exchange.cancel_order(&self.symbol, &order.order_id).await {
            Ok(()) => order.transition(OrderState::Cancelled),
            Err(e) => {
                self.record(LifecycleEvent::CancelFailed {
                    order_id: order.order_id.clone(),
                    reason: e.to_string(),
                });
                Ok(order)
            }
        }
    }

    /// Poll until one of two orders leaves the book, then cancel the other
    ///
    /// An order that vanishes without the engine cancelling it counts as
    /// filled. When both vanish as fills on the same poll the race cannot be
    /// decided and `RaceAmbiguous` is returned without touching either.
    pub async fn race_fill(&self, first: TrackedOrder, second: TrackedOrder) -> Result<RaceOutcome> {
        let started = tokio::time::Instant::now();

        loop {
            let snapshot = self.fetch_open_orders(Utc::now()).await?;
            let first_open = snapshot.contains(&first.order_id);
            let second_open = snapshot.contains(&second.order_id);

            if !first_open || !second_open {
                return self.resolve_race(first, second, &snapshot).await;
            }

            if let Some(max_wait) = self.settings.max_race_wait {
                if started.elapsed() >= max_wait {
                    let first = self.cancel_or_keep(first).await?;
                    let second = self.cancel_or_keep(second).await?;
                    return Ok(RaceOutcome::TimedOut { first, second });
                }
            }

            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    async fn resolve_race(
        &self,
        first: TrackedOrder,
        second: TrackedOrder,
        snapshot: &OpenOrdersSnapshot,
    ) -> Result<RaceOutcome> {
        let first_filled = !snapshot.contains(&first.order_id) && !snapshot.was_swept(&first.order_id);
        let second_filled = !snapshot.contains(&second.order_id) && !snapshot.was_swept(&second.order_id);

        match (first_filled, second_filled) {
            (true, true) => Err(BotError::RaceAmbiguous {
                first: first.order_id,
                second: second.order_id,
            }),
            (true, false) => {
                let loser = self.settle_loser(second, snapshot).await?;
                Ok(RaceOutcome::Won {
                    winner: first.transition(OrderState::Filled)?,
                    loser,
                })
            }
            (false, true) => {
                let loser = self.settle_loser(first, snapshot).await?;
                Ok(RaceOutcome::Won {
                    winner: second.transition(OrderState::Filled)?,
                    loser,
                })
            }
            (false, false) => {
                // At least one was swept; the race partner goes with it
                let first = self.settle_loser(first, snapshot).await?;
                let second = self.settle_loser(second, snapshot).await?;
                Ok(RaceOutcome::Expired { first, second })
            }
        }
    }

    async fn settle_loser(&self, order: TrackedOrder, snapshot: &OpenOrdersSnapshot) -> Result<TrackedOrder> {
        if snapshot.was_swept(&order.order_id) {
            order.transition(OrderState::StaleCancelled)
        } else {
            self.cancel_or_keep(order).await
        }
    }
}
