// In crates/risk/src/error.rs

use crate::chain::ChainError;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Malformed risk request: {0}")]
    InvalidRequest(String),

    #[error("No chain client configured for chain id {chain_id}")]
    NoChainClient { chain_id: u64 },

    #[error("Chain client error: {0}")]
    Chain(#[from] ChainError),

    #[error("Model {model} failed: {reason}")]
    Model { model: String, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
