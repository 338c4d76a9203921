// In crates/app-config/src/lib.rs

use config::{Config, Environment, File};
use std::collections::HashSet;

pub mod error;
pub mod types;

// Re-export the most important types for easy access.
pub use error::{Error, Result};
pub use types::{AppSettings, LiveRunConfig, PortfolioSeed, RebalanceSeed, Settings};

/// Loads the application settings from various sources.
///
/// This function orchestrates the layered configuration loading:
/// 1. Reads from a default `base.toml` file.
/// 2. Merges settings from an environment-specific file (e.g., `development.toml`).
/// 3. Merges settings from environment variables.
pub fn load_settings() -> Result<Settings> {
    let environment = std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| "development".into());

    let settings = Config::builder()
        .add_source(File::with_name("config/base"))
        .add_source(File::with_name(&format!("config/{}", environment)).required(false))
        // e.g. `APP_RISK__CACHE_TTL_SECS=60`
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let settings: Settings = settings.try_deserialize()?;
    Ok(settings)
}

/// Loads the run configuration (watchlist, portfolios, rebalance rules) from `live.toml`.
pub fn load_live_config() -> Result<LiveRunConfig> {
    let content = std::fs::read_to_string("config/live.toml")?;
    parse_live_config(&content)
}

/// Parses and cross-checks a run configuration.
pub fn parse_live_config(content: &str) -> Result<LiveRunConfig> {
    let config: LiveRunConfig = toml::from_str(content)?;

    let mut names = HashSet::new();
    for seed in &config.portfolios {
        if !names.insert(seed.name.as_str()) {
            return Err(Error::InvalidLiveConfig(format!("duplicate portfolio name: {}", seed.name)));
        }
        if seed.initial_balance <= rust_decimal::Decimal::ZERO {
            return Err(Error::InvalidLiveConfig(format!(
                "portfolio {} needs a positive initial balance",
                seed.name
            )));
        }
    }
    if let Some(orphan) = config.rebalance.iter().find(|r| !names.contains(r.portfolio.as_str())) {
        return Err(Error::InvalidLiveConfig(format!(
            "rebalance rule {} refers to unknown portfolio {}",
            orphan.name, orphan.portfolio
        )));
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::RiskLevel;
    use engine::rebalance::RebalanceStrategyType;
    use rust_decimal_macros::dec;

    const LIVE: &str = r#"
        [[watchlist]]
        address = "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2"
        symbol = "WETH"
        initial_price = 2000.0

        [[portfolio]]
        name = "growth"
        initial_balance = "25000"
        risk_level = "aggressive"
        strategies = ["momentum"]
        stop_loss = "0.08"

        [[rebalance]]
        portfolio = "growth"
        name = "core"
        strategy_type = "risk_parity"
        min_trade_amount = "50"
        [rebalance.targets]
        "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2" = "0.6"
        "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48" = "0.4"
    "#;

    #[test]
    fn parses_a_full_run_config() {
        let config = parse_live_config(LIVE).unwrap();

        assert_eq!(config.watchlist.len(), 1);
        assert_eq!(config.watchlist[0].initial_price, 2000.0);

        let seed = &config.portfolios[0];
        assert_eq!(seed.user_id, "local");
        assert_eq!(seed.initial_balance, dec!(25000));
        let profile = seed.risk_profile();
        assert_eq!(profile.risk_level, RiskLevel::Aggressive);
        assert_eq!(profile.stop_loss, dec!(0.08));
        assert_eq!(profile.max_position_size, dec!(0.20));

        let rule = &config.rebalance[0];
        assert_eq!(rule.strategy_type, RebalanceStrategyType::RiskParity);
        assert_eq!(rule.min_trade_amount, Some(dec!(50)));
        assert_eq!(rule.targets.values().copied().sum::<rust_decimal::Decimal>(), dec!(1));
    }

    #[test]
    fn rejects_rules_for_unknown_portfolios() {
        let broken = LIVE.replace("portfolio = \"growth\"", "portfolio = \"income\"");
        assert!(matches!(parse_live_config(&broken), Err(Error::InvalidLiveConfig(_))));
    }

    #[test]
    fn rejects_empty_balances() {
        let broken = LIVE.replace("\"25000\"", "\"0\"");
        assert!(matches!(parse_live_config(&broken), Err(Error::InvalidLiveConfig(_))));
    }

    #[test]
    fn empty_file_is_an_empty_run() {
        let config = parse_live_config("").unwrap();
        assert!(config.watchlist.is_empty());
        assert!(config.portfolios.is_empty());
    }
}
