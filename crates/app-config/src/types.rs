// In crates/app-config/src/types.rs

use core_types::{RiskLevel, RiskProfile};
use database::DatabaseSettings;
use engine::EngineSettings;
use engine::rebalance::RebalanceStrategyType;
use execution::SimulationSettings;
use market_data::{FeedSettings, WatchedToken};
use risk::RiskSettings;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use strategies::types::StrategySettings;

/// Everything `load_settings` produces. Each section is owned by the crate
/// that implements the concern and only aggregated here.
#[derive(Deserialize, Debug, Clone)]
pub struct Settings {
    /// The application's general settings.
    pub app: AppSettings,
    #[serde(default)]
    pub risk: RiskSettings,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub strategies: StrategySettings,
    #[serde(default)]
    pub simulation: SimulationSettings,
    #[serde(default)]
    pub market_data: FeedSettings,
    /// Without a database section the engine keeps state in memory only.
    pub database: Option<DatabaseSettings>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct AppSettings {
    /// The environment the application is running in (e.g., "development", "production").
    pub environment: String,
    /// The default log level for the application.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

// --- Structs for live.toml Configuration ---

/// The top-level configuration for a simulated or live trading run.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct LiveRunConfig {
    /// Tokens offered to every strategy on each trading tick.
    #[serde(default)]
    pub watchlist: Vec<WatchedToken>,
    #[serde(default, rename = "portfolio")]
    pub portfolios: Vec<PortfolioSeed>,
    #[serde(default)]
    pub rebalance: Vec<RebalanceSeed>,
}

/// A portfolio created when the engine starts.
#[derive(Deserialize, Debug, Clone)]
pub struct PortfolioSeed {
    pub name: String,
    #[serde(default = "default_user")]
    pub user_id: String,
    pub initial_balance: Decimal,
    pub risk_level: RiskLevel,
    /// Strategy names the portfolio allows.
    #[serde(default)]
    pub strategies: Vec<String>,
    /// Overrides for the level's stock limits.
    #[serde(default)]
    pub max_position_size: Option<Decimal>,
    #[serde(default)]
    pub max_daily_loss: Option<Decimal>,
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
    #[serde(default)]
    pub take_profit: Option<Decimal>,
}

fn default_user() -> String {
    "local".to_string()
}

impl PortfolioSeed {
    /// The level's stock profile with any configured overrides applied.
    pub fn risk_profile(&self) -> RiskProfile {
        let mut profile = RiskProfile::for_level(self.risk_level);
        if let Some(v) = self.max_position_size {
            profile.max_position_size = v;
        }
        if let Some(v) = self.max_daily_loss {
            profile.max_daily_loss = v;
        }
        if let Some(v) = self.stop_loss {
            profile.stop_loss = v;
        }
        if let Some(v) = self.take_profit {
            profile.take_profit = v;
        }
        profile
    }
}

/// A rebalance strategy attached to a seeded portfolio, matched by name.
#[derive(Deserialize, Debug, Clone)]
pub struct RebalanceSeed {
    pub portfolio: String,
    pub name: String,
    pub strategy_type: RebalanceStrategyType,
    /// Token address to target fraction. The quote token stands for cash.
    pub targets: HashMap<String, Decimal>,
    #[serde(default)]
    pub min_trade_amount: Option<Decimal>,
    /// Token address to the largest fraction it may reach.
    #[serde(default)]
    pub max_allocations: HashMap<String, Decimal>,
    /// Token address to the protocol its buys are deposited into.
    #[serde(default)]
    pub yield_targets: HashMap<String, String>,
}
