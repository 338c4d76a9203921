// In crates/core-types/src/types.rs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Generates a fresh random identifier for any entity in the system.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// The direction of a trade against the quote currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

/// The confirmed result of an executed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub portfolio_id: String,
    pub token: String,
    pub side: Side,
    /// The fill price, slippage included.
    pub price: Decimal,
    /// Token units bought or sold.
    pub quantity: Decimal,
    /// Quote spent on a buy (fee included) or received on a sell (fee deducted).
    pub quote_amount: Decimal,
    pub fee: Decimal,
    pub executed_at: DateTime<Utc>,
}
