// In crates/strategies/src/factory.rs

use crate::arbitrage::Arbitrage;
use crate::mean_reversion::MeanReversion;
use crate::momentum::Momentum;
use crate::types::StrategySettings;
use crate::{Error, Result, Strategy};
use std::sync::Arc;

pub const STRATEGY_NAMES: [&str; 3] = ["momentum", "mean_reversion", "arbitrage"];

/// Builds one strategy by name.
pub fn create_strategy(name: &str, settings: &StrategySettings) -> Result<Arc<dyn Strategy>> {
    if settings.quote_token.is_empty() {
        return Err(Error::InvalidSettings {
            strategy: name.to_string(),
            reason: "quote_token must be set".to_string(),
        });
    }
    let quote = settings.quote_token.as_str();
    let strategy: Arc<dyn Strategy> = match name {
        "momentum" => Arc::new(Momentum::new(settings.momentum.clone(), quote)),
        "mean_reversion" => Arc::new(MeanReversion::new(settings.mean_reversion.clone(), quote)),
        "arbitrage" => Arc::new(Arbitrage::new(settings.arbitrage.clone(), quote)),
        unknown => return Err(Error::UnknownStrategy(unknown.to_string())),
    };
    Ok(strategy)
}

/// Builds every known strategy. Disabled strategies are included; the engine
/// checks `is_enabled` on each tick.
pub fn create_strategies(settings: &StrategySettings) -> Result<Vec<Arc<dyn Strategy>>> {
    STRATEGY_NAMES
        .iter()
        .map(|name| create_strategy(name, settings))
        .collect()
}
