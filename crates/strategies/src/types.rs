// In crates/strategies/src/types.rs

use serde::{Deserialize, Serialize};

/// USDC on Ethereum mainnet.
pub const DEFAULT_QUOTE_TOKEN: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StrategySettings {
    /// The token every strategy buys with and sells into.
    pub quote_token: String,
    pub momentum: MomentumSettings,
    pub mean_reversion: MeanReversionSettings,
    pub arbitrage: ArbitrageSettings,
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            quote_token: DEFAULT_QUOTE_TOKEN.to_string(),
            momentum: MomentumSettings::default(),
            mean_reversion: MeanReversionSettings::default(),
            arbitrage: ArbitrageSettings::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MomentumSettings {
    pub enabled: bool,
    /// Minimum absolute 24h change, in percent, before momentum counts.
    pub price_change_threshold: f64,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    /// 24h volume over average volume needed to confirm the move.
    pub volume_ratio_threshold: f64,
    /// Quote amount proposed per signal before sizing.
    pub base_amount: f64,
    pub min_confidence: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub signal_ttl_secs: i64,
}

impl Default for MomentumSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            price_change_threshold: 5.0,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            volume_ratio_threshold: 1.5,
            base_amount: 1_000.0,
            min_confidence: 0.6,
            stop_loss_pct: 0.05,
            take_profit_pct: 0.15,
            signal_ttl_secs: 300,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MeanReversionSettings {
    pub enabled: bool,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub base_amount: f64,
    pub min_confidence: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub signal_ttl_secs: i64,
}

impl Default for MeanReversionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            base_amount: 1_000.0,
            min_confidence: 0.6,
            stop_loss_pct: 0.05,
            take_profit_pct: 0.10,
            signal_ttl_secs: 600,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ArbitrageSettings {
    pub enabled: bool,
    /// Cross-venue spread, in percent, that would justify a trade.
    pub min_spread_pct: f64,
}

impl Default for ArbitrageSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            min_spread_pct: 0.5,
        }
    }
}
