// In crates/execution/src/types.rs

use core_types::Side;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SimulationSettings {
    /// The taker fee charged on every fill (e.g., 0.003 for 0.3%).
    pub taker_fee: f64,

    /// The simulated slippage percentage for market orders (e.g., 0.0005 for 0.05%).
    pub slippage_percent: f64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            taker_fee: 0.003,
            slippage_percent: 0.0005,
        }
    }
}

/// A market order against the quote currency.
///
/// For a buy, `amount` is the quote to spend, fee included. For a sell it is
/// the number of token units to dispose of.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub portfolio_id: String,
    pub token: String,
    pub side: Side,
    pub amount: Decimal,
}

impl OrderRequest {
    pub fn buy(portfolio_id: &str, token: &str, quote_amount: Decimal) -> Self {
        Self {
            portfolio_id: portfolio_id.to_string(),
            token: token.to_string(),
            side: Side::Buy,
            amount: quote_amount,
        }
    }

    pub fn sell(portfolio_id: &str, token: &str, quantity: Decimal) -> Self {
        Self {
            portfolio_id: portfolio_id.to_string(),
            token: token.to_string(),
            side: Side::Sell,
            amount: quantity,
        }
    }
}
