// In app/src/main.rs

use anyhow::{Context, Result};
use app_config::{LiveRunConfig, Settings};
use clap::{Parser, Subcommand};
use database::Store;
use engine::TradingEngine;
use engine::rebalance::{Constraint, RebalanceStrategy};
use events::EngineEvent;
use execution::SimulatedExecutor;
use market_data::{HttpMarketData, MarketDataProvider, SimulatedFeed};
use risk::{RiskAssessor, RiskEngine, TransactionRiskRequest};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing_subscriber::prelude::*;

// --- Command-Line Interface Definition ---

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = "A risk-gated crypto trading engine.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Runs the trading and rebalance loops until Ctrl-C.
    Run,

    /// Scores a single transaction and prints the assessment as JSON.
    Assess {
        /// Sending address.
        #[arg(long)]
        from: String,

        /// Receiving address or contract.
        #[arg(long)]
        to: String,

        /// Value in native units (e.g. "1.5" ETH).
        #[arg(long, default_value = "0")]
        value: Decimal,

        /// Hex-encoded call data.
        #[arg(long)]
        data: Option<String>,

        #[arg(long, default_value_t = 21_000)]
        gas_limit: u64,

        /// Gas price in gwei.
        #[arg(long, default_value = "30")]
        gas_price: Decimal,

        #[arg(long, default_value_t = 1)]
        chain_id: u64,

        /// Skip model predictions.
        #[arg(long)]
        no_ml: bool,
    },
}

// --- Main Application Entry Point ---

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from a .env file, if it exists.
    dotenvy::dotenv().ok();

    let settings = app_config::load_settings().context("Failed to load settings")?;

    let default_level = settings
        .app
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    let fmt_layer = tracing_subscriber::fmt::layer().with_filter(
        tracing_subscriber::filter::Targets::new()
            .with_target("sqlx::query", tracing::Level::WARN)
            .with_default(default_level),
    );
    tracing_subscriber::registry().with(fmt_layer).init();

    let cli = Cli::parse();
    tracing::info!(environment = %settings.app.environment, "Starting Atlas application");

    match cli.command {
        Commands::Run => run_app(settings).await?,
        Commands::Assess {
            from,
            to,
            value,
            data,
            gas_limit,
            gas_price,
            chain_id,
            no_ml,
        } => {
            let request = TransactionRiskRequest {
                from,
                to,
                value,
                data,
                chain_id,
                gas_limit,
                gas_price,
                transaction_hash: None,
                include_ml: !no_ml,
            };
            handle_assess(settings, request).await?;
        }
    }

    tracing::info!("Atlas application has finished successfully.");
    Ok(())
}

// --- "Run" Subcommand Logic ---

/// Wires every component together and runs the engine until Ctrl-C.
async fn run_app(settings: Settings) -> Result<()> {
    // --- 1. Initialization ---
    let live = app_config::load_live_config().context("Failed to load config/live.toml")?;
    tracing::info!(
        tokens = live.watchlist.len(),
        portfolios = live.portfolios.len(),
        rebalance_rules = live.rebalance.len(),
        "Run configuration loaded."
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let store: Option<Arc<dyn Store>> = match &settings.database {
        Some(db_settings) => {
            let db: Arc<dyn Store> = Arc::new(database::connect(db_settings).await?);
            Some(db)
        }
        None => {
            tracing::info!("No database configured; state is kept in memory only.");
            None
        }
    };

    // --- 2. Component Instantiation ---
    let mut risk_engine = RiskEngine::new(settings.risk.clone());
    if let Some(store) = &store {
        risk_engine = risk_engine.with_store(store.clone());
    }
    let assessor: Arc<dyn RiskAssessor> = Arc::new(risk_engine);

    let (market, feed_handle) = market_source(&settings, &live, shutdown_rx.clone())?;
    let executor = Arc::new(SimulatedExecutor::new(&settings.simulation)?);
    let strategies = strategies::create_strategies(&settings.strategies)?;

    // --- 3. Create the Trading Engine ---
    let watchlist = live
        .watchlist
        .iter()
        .map(|t| t.address.to_ascii_lowercase())
        .collect();
    let mut engine = TradingEngine::new(settings.engine.clone(), assessor, market, executor, strategies)
        .with_watchlist(watchlist);
    if let Some(store) = store {
        engine = engine.with_store(store);
    }
    let engine = Arc::new(engine);
    seed_engine(&engine, &live).await?;

    // --- 4. Launch Concurrent Tasks ---
    let events_handle = tokio::spawn(log_events(engine.subscribe()));
    let engine_handle = engine.clone().start(shutdown_rx);

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested; finishing in-flight work.");
    shutdown_tx.send_replace(true);

    engine_handle.await?;
    if let Some(handle) = feed_handle {
        handle.await?;
    }
    events_handle.abort();

    for portfolio_id in engine.portfolio_ids() {
        let portfolio = engine.portfolio(&portfolio_id).await?;
        tracing::info!(
            name = %portfolio.name,
            total_value = %portfolio.total_value,
            available = %portfolio.available_balance,
            realized_pnl = %portfolio.realized_pnl,
            total_pnl = %portfolio.total_pnl,
            open_positions = portfolio.active_positions.len(),
            "Final portfolio state."
        );
    }
    Ok(())
}

/// Picks the market data provider named by `market_data.source`. The simulated
/// feed gets its own stepping task, returned so shutdown can wait on it.
fn market_source(
    settings: &Settings,
    live: &LiveRunConfig,
    shutdown: watch::Receiver<bool>,
) -> Result<(Arc<dyn MarketDataProvider>, Option<JoinHandle<()>>)> {
    match settings.market_data.source.as_str() {
        "simulated" => {
            let feed = Arc::new(SimulatedFeed::new(&settings.market_data, &live.watchlist)?);
            let handle = tokio::spawn(feed.clone().run(shutdown));
            tracing::info!(tokens = live.watchlist.len(), "Using the simulated market feed.");
            let provider: Arc<dyn MarketDataProvider> = feed;
            Ok((provider, Some(handle)))
        }
        "http" => {
            let base_url = settings
                .market_data
                .base_url
                .as_deref()
                .context("market_data.base_url is required for the http source")?;
            let provider = HttpMarketData::new(base_url, settings.market_data.request_timeout_secs)?;
            tracing::info!(base_url, "Using the HTTP market data provider.");
            let provider: Arc<dyn MarketDataProvider> = Arc::new(provider);
            Ok((provider, None))
        }
        other => anyhow::bail!("Unknown market data source: {other}"),
    }
}

/// Creates the configured portfolios and attaches their rebalance strategies.
async fn seed_engine(engine: &TradingEngine, live: &LiveRunConfig) -> Result<()> {
    let mut ids: HashMap<&str, String> = HashMap::new();
    for seed in &live.portfolios {
        let portfolio = engine
            .create_portfolio(
                &seed.user_id,
                &seed.name,
                seed.initial_balance,
                seed.risk_profile(),
                seed.strategies.clone(),
            )
            .await?;
        ids.insert(seed.name.as_str(), portfolio.id);
    }

    for rule in &live.rebalance {
        let portfolio_id = ids
            .get(rule.portfolio.as_str())
            .with_context(|| format!("Rebalance rule {} names unknown portfolio {}", rule.name, rule.portfolio))?;
        let mut strategy = RebalanceStrategy::new(portfolio_id, &rule.name, rule.strategy_type, rule.targets.clone())?;
        if let Some(amount) = rule.min_trade_amount {
            strategy = strategy.with_constraint(Constraint::MinTradeAmount { amount });
        }
        for (token, max) in &rule.max_allocations {
            strategy = strategy.with_constraint(Constraint::MaxAllocation {
                token: token.to_ascii_lowercase(),
                max: *max,
            });
        }
        for (token, protocol) in &rule.yield_targets {
            strategy = strategy.with_yield_target(token, protocol);
        }
        engine.set_rebalance_strategy(strategy)?;
    }
    Ok(())
}

/// Writes every engine event to the log as JSON.
async fn log_events(mut rx: broadcast::Receiver<EngineEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match events::to_json(&event) {
                Ok(json) => tracing::debug!(target: "events", %json, "Engine event."),
                Err(e) => tracing::warn!(error = %e, "Could not serialise engine event."),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event log fell behind.");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

// --- "Assess" Subcommand Logic ---

async fn handle_assess(settings: Settings, request: TransactionRiskRequest) -> Result<()> {
    let engine = RiskEngine::new(settings.risk);
    let assessment = engine.assess_transaction_risk(&request).await?;
    println!("{}", serde_json::to_string_pretty(&assessment)?);
    Ok(())
}
