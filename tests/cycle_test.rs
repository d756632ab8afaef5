use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use futuresbot::execution::{
    CycleOutcome, EngineSettings, GateDecision, MarketSeries, OrderSettings, RaceOutcome,
    TradingEngine,
};
use futuresbot::risk::RiskPolicy;
use futuresbot::strategy::{SignalDetector, SignalMode, Trend, TrendSource};
use futuresbot::{BotError, Candle, OrderState, PaperExchange, Position, Side};
use std::sync::Arc;
use std::time::Duration;

const EPS: f64 = 1e-6;

/// 60 one-minute candles ranging 60000-62000 with a constant true range of 200
/// over the most recent part of the window; returned newest first like Bybit
fn btc_candles() -> Vec<Candle> {
    let mut candles: Vec<Candle> = (0..60)
        .map(|i| Candle {
            timestamp: Utc.timestamp_opt(1_700_000_000 + i * 60, 0).unwrap(),
            open: 61000.0,
            high: match i {
                10 => 62000.0,
                _ => 61100.0,
            },
            low: match i {
                5 => 60000.0,
                _ => 60900.0,
            },
            close: 61000.0,
            volume: 3.5,
        })
        .collect();
    candles.reverse();
    candles
}

fn engine(exchange: &Arc<PaperExchange>, mode: SignalMode) -> TradingEngine<PaperExchange> {
    TradingEngine::new(
        exchange.clone(),
        EngineSettings {
            symbol: "BTCUSDT".to_string(),
            quantity: 0.03,
            interval: "1".to_string(),
            limit: 100,
        },
        60,
        OrderSettings {
            maker_offset_pct: 0.0001,
            leverage: 10,
            stale_after_secs: 180,
            poll_interval: Duration::from_millis(1),
            max_race_wait: Some(Duration::from_secs(5)),
        },
        SignalDetector::new(60, mode),
        RiskPolicy::Atr {
            period: 14,
            multiplier: 1.5,
            risk_ratio: 2.0,
        },
    )
}

struct FixedTrend(Trend);

impl TrendSource for FixedTrend {
    fn trend(&self, _series: &MarketSeries) -> futuresbot::Result<Trend> {
        Ok(self.0)
    }
}

fn market(price: f64) -> Arc<PaperExchange> {
    let _ = tracing_subscriber::fmt::try_init();

    let exchange = Arc::new(PaperExchange::new());
    exchange.set_candles(btc_candles()).unwrap();
    exchange.set_last_price(price).unwrap();
    exchange
}

#[tokio::test]
async fn test_proximity_long_near_support() {
    let exchange = market(60050.0);

    let outcome = engine(&exchange, SignalMode::Proximity).run_cycle().await.unwrap();

    let (order, risk) = match outcome {
        CycleOutcome::Placed { order, risk } => (order, risk),
        other => panic!("expected an order, got {:?}", other),
    };
    assert_eq!(order.side, Side::Long);
    assert_eq!(order.state, OrderState::Open);
    // Entry at support 60000, stop distance 1.5 × ATR(200) = 300
    assert!((risk.stop_loss - 59700.0).abs() < EPS);
    assert!((risk.take_profit - 60600.0).abs() < EPS);

    let sent = exchange.submitted().unwrap();
    assert_eq!(sent.len(), 1);
    assert!((sent[0].price - 59994.0).abs() < EPS);
    assert_eq!(sent[0].stop_loss, Some(risk.stop_loss));
    assert_eq!(sent[0].take_profit, Some(risk.take_profit));
    assert_eq!(exchange.leverage_calls().unwrap(), vec![10]);
}

#[tokio::test]
async fn test_proximity_short_near_resistance() {
    let exchange = market(61900.0);

    let outcome = engine(&exchange, SignalMode::Proximity).run_cycle().await.unwrap();

    match outcome {
        CycleOutcome::Placed { order, risk } => {
            assert_eq!(order.side, Side::Short);
            assert!((risk.stop_loss - 62300.0).abs() < EPS);
            assert!((risk.take_profit - 61400.0).abs() < EPS);
        }
        other => panic!("expected an order, got {:?}", other),
    }
}

#[tokio::test]
async fn test_downtrend_holds_long_near_support() {
    let exchange = market(60050.0);
    let detector = SignalDetector::new(60, SignalMode::Proximity)
        .with_trend_source(Box::new(FixedTrend(Trend::Short)));
    let engine = engine(&exchange, SignalMode::Proximity).with_detector(detector);

    let outcome = engine.run_cycle().await.unwrap();

    match outcome {
        CycleOutcome::NoSignal { levels, price } => {
            assert!((levels.support.price - 60000.0).abs() < EPS);
            assert!((levels.resistance.price - 62000.0).abs() < EPS);
            assert!((price - 60050.0).abs() < EPS);
        }
        other => panic!("expected no signal, got {:?}", other),
    }
    assert!(exchange.submitted().unwrap().is_empty());
}

#[tokio::test]
async fn test_second_cycle_blocked_by_resting_order() {
    let exchange = market(60050.0);
    let engine = engine(&exchange, SignalMode::Proximity);

    assert!(matches!(engine.run_cycle().await.unwrap(), CycleOutcome::Placed { .. }));

    let outcome = engine.run_cycle().await.unwrap();
    assert_eq!(outcome, CycleOutcome::Skipped(GateDecision::OpenOrders { count: 1 }));
    assert_eq!(exchange.submitted().unwrap().len(), 1);
}

#[tokio::test]
async fn test_open_position_blocks_cycle() {
    let exchange = market(60050.0);
    exchange
        .set_positions(vec![Position {
            symbol: "BTCUSDT".to_string(),
            size: 0.03,
            updated_time: Utc::now() - ChronoDuration::seconds(3600),
            leverage: Some(10.0),
        }])
        .unwrap();

    let outcome = engine(&exchange, SignalMode::Proximity).tick().await;

    assert_eq!(
        outcome,
        Some(CycleOutcome::Skipped(GateDecision::OpenPosition { size: 0.03 }))
    );
    assert!(exchange.submitted().unwrap().is_empty());
}

#[tokio::test]
async fn test_cooldown_boundary_end_to_end() {
    let exchange = market(60050.0);
    let engine = engine(&exchange, SignalMode::Proximity);

    let closed = |secs_ago: i64| Position {
        symbol: "BTCUSDT".to_string(),
        size: 0.0,
        updated_time: Utc::now() - ChronoDuration::seconds(secs_ago),
        leverage: Some(10.0),
    };

    exchange.set_positions(vec![closed(30)]).unwrap();
    assert!(matches!(
        engine.run_cycle().await.unwrap(),
        CycleOutcome::Skipped(GateDecision::Cooldown { .. })
    ));

    exchange.set_positions(vec![closed(61)]).unwrap();
    assert!(matches!(engine.run_cycle().await.unwrap(), CycleOutcome::Placed { .. }));
}

#[tokio::test]
async fn test_dual_race_keeps_first_fill() {
    let exchange = market(61000.0);
    let engine = engine(&exchange, SignalMode::DualRace);

    // Orders are numbered in placement order: long first, then short
    exchange.fill_on_poll("paper-2", 3).unwrap();

    let outcome = engine.run_cycle().await.unwrap();

    match outcome {
        CycleOutcome::Raced(RaceOutcome::Won { winner, loser }) => {
            assert_eq!(winner.order_id, "paper-2");
            assert_eq!(winner.side, Side::Short);
            assert_eq!(winner.state, OrderState::Filled);
            assert_eq!(loser.order_id, "paper-1");
            assert_eq!(loser.state, OrderState::Cancelled);
        }
        other => panic!("expected a race winner, got {:?}", other),
    }
    assert_eq!(exchange.cancelled().unwrap(), vec!["paper-1".to_string()]);
    assert!(exchange.open_order_ids().unwrap().is_empty());

    let sent = exchange.submitted().unwrap();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].side, Side::Long);
    assert!(sent[0].price < 60000.0);
    assert_eq!(sent[1].side, Side::Short);
    assert!(sent[1].price > 62000.0);
}

#[tokio::test]
async fn test_dual_race_double_fill_abstains() {
    let exchange = market(61000.0);
    exchange.fill_on_poll("paper-1", 2).unwrap();
    exchange.fill_on_poll("paper-2", 2).unwrap();

    let outcome = engine(&exchange, SignalMode::DualRace).tick().await;

    assert_eq!(
        outcome,
        Some(CycleOutcome::RaceAmbiguous {
            first: "paper-1".to_string(),
            second: "paper-2".to_string(),
        })
    );
    assert!(exchange.cancelled().unwrap().is_empty());
}

#[tokio::test]
async fn test_dual_race_poll_failure_leaves_orders_on_book() {
    let exchange = market(61000.0);
    // First poll is the gate check; the race's first poll fails
    exchange.fail_polls_from(2, "request timeout").unwrap();
    let engine = engine(&exchange, SignalMode::DualRace);

    let result = engine.run_cycle().await;

    assert!(matches!(result, Err(BotError::Api { .. })));
    assert_eq!(
        exchange.open_order_ids().unwrap(),
        vec!["paper-1".to_string(), "paper-2".to_string()]
    );
    assert!(exchange.cancelled().unwrap().is_empty());
    assert_eq!(engine.tick().await, None);
}

#[tokio::test]
async fn test_stale_order_swept_then_cycle_proceeds() {
    let exchange = market(60050.0);
    exchange
        .add_open_order("forgotten", Utc::now() - ChronoDuration::seconds(600))
        .unwrap();

    let outcome = engine(&exchange, SignalMode::Proximity).run_cycle().await.unwrap();

    assert!(matches!(outcome, CycleOutcome::Placed { .. }));
    assert_eq!(exchange.cancelled().unwrap(), vec!["forgotten".to_string()]);
}
