use anyhow::{Context, Result};
use clap::Parser;
use perpbot::analysis::PriceAnalyzer;
use perpbot::api::{
    BinanceFuturesClient, Credentials, ExchangeGateway, LogNotifier, Notifier, PaperExchange,
};
use perpbot::config::AppConfig;
use perpbot::execution::{Orchestrator, PositionController};
use perpbot::feed::{BinanceTransportFactory, PriceFeed};
use perpbot::risk::{MarginMonitor, RiskManager};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "perpbot")]
#[command(about = "Risk-managed futures position engine", long_about = None)]
#[command(version)]
struct Args {
    /// Symbols to trade, e.g. BTCUSDT ETHUSDT
    #[arg(required = true)]
    symbols: Vec<String>,

    /// TOML config file (defaults to ./perpbot.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Trade against the in-memory paper exchange
    #[arg(long)]
    paper: bool,

    /// Override the session length
    #[arg(long)]
    session_hours: Option<u64>,

    /// Paper wallet balance in USDT
    #[arg(long, default_value_t = 10_000.0)]
    balance: f64,
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("perpbot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_gateway(args: &Args, config: &AppConfig) -> Result<Arc<dyn ExchangeGateway>> {
    if args.paper {
        let market = BinanceFuturesClient::new(&config.exchange, None)
            .context("Failed to build market data client")?;
        tracing::info!("📝 Paper trading with ${:.2}", args.balance);
        return Ok(Arc::new(
            PaperExchange::new(args.balance).with_market_data(Arc::new(market)),
        ));
    }

    let credentials = Credentials::from_env()
        .context("BINANCE_API_KEY and BINANCE_API_SECRET must be set for live trading")?;
    let client = BinanceFuturesClient::new(&config.exchange, Some(credentials))
        .context("Failed to build exchange client")?;
    Ok(Arc::new(client))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let args = Args::parse();
    let mut config =
        AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(hours) = args.session_hours {
        config.engine.session_hours = hours;
    }

    tracing::info!("🚀 PerpBot starting{}", if args.paper { " (paper)" } else { "" });

    let gateway = build_gateway(&args, &config)?;
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let analyzer = PriceAnalyzer::default();

    let risk = Arc::new(RiskManager::new(
        config.policy.clone(),
        &config.engine,
        Arc::clone(&gateway),
        analyzer.clone(),
    ));
    let controller = Arc::new(PositionController::new(
        Arc::clone(&gateway),
        Arc::clone(&risk),
        Arc::clone(&notifier),
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        config.engine.clone(),
        analyzer,
        Arc::clone(&risk),
        controller,
        Arc::clone(&gateway),
        Arc::clone(&notifier),
    ));

    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Leverage: {}x", config.policy.leverage);
    tracing::info!("  Max Positions: {}", config.policy.max_positions);
    tracing::info!("  Max Daily Trades: {}", config.policy.max_daily_trades);
    tracing::info!("  Risk Per Trade: {}%", config.policy.risk_per_trade * 100.0);
    tracing::info!("  Session: {}h", config.engine.session_hours);

    let factory = Arc::new(BinanceTransportFactory::new(config.feed.clone()));
    let (feed, events) = PriceFeed::new(config.feed.clone(), factory);
    for symbol in &args.symbols {
        feed.subscribe(symbol);
        tracing::info!("    - {}", symbol.to_uppercase());
    }

    let cancel = CancellationToken::new();

    let engine_task = tokio::spawn(Arc::clone(&orchestrator).run(events, cancel.clone()));

    let margin_task = {
        let monitor = MarginMonitor::new(
            Arc::clone(&gateway),
            Arc::clone(&notifier),
            config.policy.max_margin_ratio,
            Duration::from_secs(config.engine.margin_check_interval_secs.max(1)),
            Duration::from_secs(config.engine.margin_warning_interval_secs),
        );
        tokio::spawn(monitor.run(cancel.clone()))
    };

    let status_task = {
        let orchestrator = Arc::clone(&orchestrator);
        let cancel = cancel.clone();
        let period = Duration::from_secs(config.engine.status_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => orchestrator.status().log(),
                }
            }
        })
    };

    tracing::info!("\nPress Ctrl+C to stop...\n");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");
        }
        _ = tokio::time::sleep(config.engine.session_duration()) => {
            tracing::info!("⏰ Session time limit reached, shutting down...");
        }
    }

    cancel.cancel();
    feed.unsubscribe_all().await;

    for (name, task) in [
        ("Orchestrator", engine_task),
        ("Margin monitor", margin_task),
        ("Status", status_task),
    ] {
        if let Err(e) = task.await {
            tracing::error!("{} task failed: {}", name, e);
        }
    }

    let report = orchestrator.status();
    report.log();
    if !report.positions.is_empty() {
        tracing::warn!(
            "{} position(s) left open with their protective orders",
            report.positions.len()
        );
    }

    tracing::info!("👋 PerpBot stopped");
    Ok(())
}
