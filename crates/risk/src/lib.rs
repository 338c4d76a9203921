// In crates/risk/src/lib.rs

use async_trait::async_trait;
use core_types::RiskAssessment;

pub mod analyzers;
pub mod bytecode;
pub mod cache;
pub mod chain;
pub mod engine;
pub mod error;
pub mod ml;
pub mod scoring;
pub mod screen;
pub mod types;

// Re-export public types
pub use chain::{ChainClient, ChainError};
pub use engine::RiskEngine;
pub use error::{Error, Result};
pub use ml::{ModelKind, RiskModel};
pub use screen::{AddressScreen, StaticDenylist};
pub use types::{ContractRiskRequest, RiskSettings, TransactionRiskRequest};

/// The interface the trading engine gates signals through.
///
/// An assessor turns a proposed transaction, or a contract the engine is about
/// to interact with, into an explainable [`RiskAssessment`]. Errors are reserved
/// for requests that cannot be assessed at all (malformed input, no chain
/// client for a required chain); partial failures inside the assessment are
/// absorbed and reflected in its confidence.
#[async_trait]
pub trait RiskAssessor: Send + Sync {
    async fn assess_transaction(&self, request: &TransactionRiskRequest) -> Result<RiskAssessment>;

    async fn assess_contract(&self, request: &ContractRiskRequest) -> Result<RiskAssessment>;

    /// Drops stale cached assessments, returning how many went. Assessors
    /// without a cache have nothing to purge.
    fn purge_expired(&self) -> usize {
        0
    }
}
