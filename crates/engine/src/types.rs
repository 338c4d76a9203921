// In crates/engine/src/types.rs

use core_types::{Execution, RiskAssessment, SafetyGrade};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Settings for the trading engine, loaded from the `[engine]` table.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct EngineSettings {
    pub trading_interval_secs: u64,
    pub rebalance_interval_secs: u64,

    // --- Risk gate ---
    /// Signals whose assessment scores above this are dropped.
    pub max_risk_score: f64,
    /// Grades that are dropped regardless of score.
    pub rejected_grades: Vec<SafetyGrade>,
    pub include_ml: bool,

    // --- Shape of the transaction submitted for assessment ---
    /// The account the engine trades from.
    pub wallet_address: String,
    pub chain_id: u64,
    pub gas_limit: u64,
    pub gas_price_gwei: f64,
    /// Token whose price converts a quote-denominated trade into native units
    /// for the value check. Unset means trades are assessed with zero value.
    pub native_token: Option<String>,

    /// The currency balances are held in. Rebalance targets naming it refer to cash.
    pub quote_token: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            trading_interval_secs: 30,
            rebalance_interval_secs: 300,
            max_risk_score: 70.0,
            rejected_grades: vec![SafetyGrade::D, SafetyGrade::F],
            include_ml: true,
            wallet_address: "0x5aeda56215b167893e80b4fe645ba6d5bab767de".to_string(),
            chain_id: 1,
            gas_limit: 250_000,
            gas_price_gwei: 30.0,
            native_token: None,
            quote_token: strategies::types::DEFAULT_QUOTE_TOKEN.to_string(),
        }
    }
}

/// Why a signal was dropped before execution.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    NotActionable,
    RiskScore { score: f64, max: f64 },
    RiskGrade(SafetyGrade),
    DailyLossLimit,
    PositionLimit,
    InsufficientBalance,
    NoHolding,
    ZeroSize,
    /// The market quoted the token at zero or below.
    NoPrice,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::NotActionable => f.write_str("signal is not actionable"),
            RejectReason::RiskScore { score, max } => write!(f, "risk score {score:.1} exceeds {max:.1}"),
            RejectReason::RiskGrade(grade) => write!(f, "safety grade {grade} is not accepted"),
            RejectReason::DailyLossLimit => f.write_str("daily loss limit reached"),
            RejectReason::PositionLimit => f.write_str("amount exceeds the maximum position size"),
            RejectReason::InsufficientBalance => f.write_str("amount exceeds the available balance"),
            RejectReason::NoHolding => f.write_str("nothing held to sell"),
            RejectReason::ZeroSize => f.write_str("sized to zero"),
            RejectReason::NoPrice => f.write_str("no usable market price"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Rejection {
    pub signal_id: String,
    pub strategy: String,
    pub reason: RejectReason,
    /// Present when the signal got as far as the risk gate.
    pub assessment: Option<RiskAssessment>,
}

#[derive(Debug, Clone)]
pub struct TradeReport {
    pub execution: Execution,
    /// The position opened by a buy. Sells never open one.
    pub position_id: Option<String>,
    pub assessment: RiskAssessment,
}

/// What became of a signal. Gate rejections are expected outcomes, not errors.
#[derive(Debug, Clone)]
pub enum SignalOutcome {
    Executed(TradeReport),
    Rejected(Rejection),
}

impl SignalOutcome {
    pub fn is_executed(&self) -> bool {
        matches!(self, SignalOutcome::Executed(_))
    }
}

/// Counters for one pass of the trading loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub portfolios: usize,
    pub signals: usize,
    pub executed: usize,
    pub rejected: usize,
    pub failed: usize,
    pub closed: usize,
}
