// In crates/engine/src/defi.rs

//! The boundary to DeFi protocol integrations used for yield rebalancing.

use crate::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefiActionKind {
    Deposit,
    Withdraw,
    Stake,
    Unstake,
}

/// One protocol interaction, in token units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefiAction {
    pub protocol: String,
    pub kind: DefiActionKind,
    pub token: String,
    pub amount: Decimal,
    pub wallet: String,
    pub chain_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefiActionResult {
    pub transaction_hash: Option<String>,
    /// Token units the protocol actually accepted or released.
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefiPosition {
    pub protocol: String,
    pub token: String,
    pub amount: Decimal,
    pub apy: f64,
}

/// Encodes and submits protocol-specific calls. The engine only reaches for it
/// when a rebalance targets a yield position.
#[async_trait]
pub trait ProtocolManager: Send + Sync {
    async fn execute_action(&self, action: &DefiAction) -> Result<DefiActionResult>;

    async fn get_positions(&self, wallet: &str, chain_id: u64) -> Result<Vec<DefiPosition>>;

    /// Current yield on `token`, as a fraction (0.05 is 5%).
    async fn get_apy(&self, token: &str, chain_id: u64) -> Result<f64>;
}
