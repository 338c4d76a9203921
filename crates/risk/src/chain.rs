// In crates/risk/src/chain.rs

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChainError {
    #[error("RPC request failed: {0}")]
    Rpc(String),

    #[error("RPC request timed out")]
    Timeout,
}

/// The chain primitives contract analysis needs.
///
/// Only `get_code`, `block_number` and `call_contract` are required. The
/// remaining methods are enrichment sources; clients that cannot answer them
/// keep the defaults and the corresponding checks are skipped.
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn chain_id(&self) -> u64;

    /// Runtime bytecode deployed at `address`. Empty for externally owned accounts.
    async fn get_code(&self, address: &str) -> Result<Vec<u8>, ChainError>;

    async fn block_number(&self) -> Result<u64, ChainError>;

    /// Executes a read-only call and returns the raw return data.
    async fn call_contract(&self, to: &str, data: &[u8]) -> Result<Vec<u8>, ChainError>;

    async fn deployment_block(&self, _address: &str) -> Result<Option<u64>, ChainError> {
        Ok(None)
    }

    async fn is_verified(&self, _address: &str) -> Result<Option<bool>, ChainError> {
        Ok(None)
    }

    async fn transaction_count(&self, _address: &str) -> Result<Option<u64>, ChainError> {
        Ok(None)
    }
}
