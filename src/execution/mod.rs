// Order lifecycle, cycle admission and market data
pub mod engine;
pub mod market_series;
pub mod order_manager;
pub mod position_gate;

pub use engine::{CycleOutcome, EngineSettings, TradingEngine};
pub use market_series::{MarketSeries, PriceField};
pub use order_manager::{
    maker_price, stale_orders, LifecycleEvent, OpenOrdersSnapshot, OrderLifecycleManager, OrderSettings, RaceOutcome,
};
pub use position_gate::{GateDecision, PositionGate};
