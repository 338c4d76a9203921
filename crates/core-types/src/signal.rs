// In crates/core-types/src/signal.rs

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
    Swap,
    Stake,
    Unstake,
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignalAction::Buy => "buy",
            SignalAction::Sell => "sell",
            SignalAction::Hold => "hold",
            SignalAction::Swap => "swap",
            SignalAction::Stake => "stake",
            SignalAction::Unstake => "unstake",
        };
        f.write_str(name)
    }
}

impl FromStr for SignalAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "buy" => Ok(SignalAction::Buy),
            "sell" => Ok(SignalAction::Sell),
            "hold" => Ok(SignalAction::Hold),
            "swap" => Ok(SignalAction::Swap),
            "stake" => Ok(SignalAction::Stake),
            "unstake" => Ok(SignalAction::Unstake),
            other => Err(Error::UnknownAction(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

/// An ephemeral strategy output proposing a trade.
///
/// Lives for a single trading tick. The risk assessment that approved it is
/// attached to `metadata` under the `risk_assessment` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingSignal {
    pub id: String,
    pub strategy: String,
    pub action: SignalAction,
    pub token_in: String,
    pub token_out: String,
    /// Proposed trade size, expressed in quote currency.
    pub amount_in: Decimal,
    pub expected_out: Decimal,
    pub confidence: f64,
    pub urgency: Urgency,
    pub valid_until: DateTime<Utc>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TradingSignal {
    /// The token this signal wants exposure to (or away from).
    pub fn target_token(&self) -> &str {
        match self.action {
            SignalAction::Sell | SignalAction::Unstake => &self.token_in,
            _ => &self.token_out,
        }
    }

    pub fn is_actionable(&self) -> bool {
        self.action != SignalAction::Hold
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.valid_until
    }
}
