use clap::Parser;
use futuresbot::api::{BybitClient, BybitCredentials};
use futuresbot::config::BotConfig;
use futuresbot::execution::TradingEngine;
use futuresbot::strategy::SignalMode;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "futuresbot", about = "Support/resistance futures bot for Bybit")]
struct Cli {
    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,

    /// Override SIGNAL_MODE (proximity | dual_race)
    #[arg(long)]
    mode: Option<SignalMode>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();

    let mut config = BotConfig::from_env()?;
    if let Some(mode) = cli.mode {
        config.signal_mode = mode;
    }

    let client = BybitClient::new(
        BybitCredentials {
            api_key: config.bybit_api_key.clone(),
            api_secret: config.bybit_api_secret.clone(),
        },
        config.bybit_base_url.clone(),
        config.position_mode,
        config.price_decimals,
    )?;
    let engine = TradingEngine::from_config(Arc::new(client), &config);

    tracing::info!("🚀 futuresbot starting");
    tracing::info!("📊 Configuration:");
    tracing::info!("  Exchange: {}", config.bybit_base_url);
    tracing::info!("  Symbol: {} x{} qty {}", config.trading_symbol, config.leverage, config.trade_quantity);
    tracing::info!("  Mode: {}", engine.mode());
    tracing::info!("  Risk: {:?}", config.risk());
    tracing::info!(
        "  Cooldown: {}s | Stale orders: {}s | Cycle: {}s",
        config.cooldown_secs,
        config.stale_order_secs,
        config.cycle_interval_secs
    );

    if cli.once {
        engine.tick().await;
        return Ok(());
    }

    let mut ticker = interval(Duration::from_secs(config.cycle_interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("⚠️  Received Ctrl+C, shutting down...");
                break;
            }
            _ = ticker.tick() => {
                engine.tick().await;
            }
        }
    }

    tracing::info!("👋 futuresbot stopped");
    Ok(())
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("futuresbot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
