// In crates/core-types/src/market.rs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Technical indicators the market data provider computes alongside the price.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TechnicalIndicators {
    pub rsi: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub bollinger_upper: f64,
    pub bollinger_lower: f64,
    pub sma_20: f64,
    pub sma_50: f64,
    pub ema_12: f64,
    pub ema_26: f64,
    /// Average traded volume over the indicator window.
    pub volume: f64,
    pub vwap: f64,
}

/// A point-in-time market observation for one token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    pub token_address: String,
    pub symbol: String,
    pub price: Decimal,
    pub volume_24h: Decimal,
    pub market_cap: Decimal,
    /// Percentage change over 24h, e.g. `6.0` for +6%.
    pub price_change_24h: f64,
    pub liquidity: Decimal,
    /// Annualised volatility as a fraction.
    pub volatility: f64,
    pub technical_indicators: TechnicalIndicators,
    pub timestamp: DateTime<Utc>,
}

impl MarketData {
    /// Creates an observation with neutral indicators, useful as a starting point.
    pub fn new(token_address: impl Into<String>, symbol: impl Into<String>, price: Decimal) -> Self {
        Self {
            token_address: token_address.into(),
            symbol: symbol.into(),
            price,
            volume_24h: Decimal::ZERO,
            market_cap: Decimal::ZERO,
            price_change_24h: 0.0,
            liquidity: Decimal::ZERO,
            volatility: 0.0,
            technical_indicators: TechnicalIndicators {
                rsi: 50.0,
                ..Default::default()
            },
            timestamp: Utc::now(),
        }
    }

    /// Current 24h volume relative to the indicator window's average volume.
    ///
    /// Returns `1.0` when no average is available.
    pub fn volume_ratio(&self) -> f64 {
        use rust_decimal::prelude::ToPrimitive;

        let average = self.technical_indicators.volume;
        if average <= 0.0 {
            return 1.0;
        }
        self.volume_24h.to_f64().unwrap_or(0.0) / average
    }
}
