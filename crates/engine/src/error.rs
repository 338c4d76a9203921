// In crates/engine/src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Portfolio not found: {0}")]
    PortfolioNotFound(String),

    #[error("Position not found: {0}")]
    PositionNotFound(String),

    #[error("Position {0} is already closed")]
    PositionAlreadyClosed(String),

    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("Target allocations must sum to 1.0 (got {sum})")]
    InvalidAllocation { sum: f64 },

    #[error("Invalid rebalance configuration: {0}")]
    InvalidRebalance(String),

    #[error("No rebalance strategy for portfolio {0}")]
    RebalanceStrategyNotFound(String),

    #[error("A yield rebalance needs a DeFi protocol manager, none is configured")]
    NoProtocolManager,

    #[error("Protocol {protocol} failed: {reason}")]
    ProtocolFailed { protocol: String, reason: String },

    #[error("Risk assessment failed: {0}")]
    Risk(#[from] risk::Error),

    #[error("Strategy error: {0}")]
    Strategy(#[from] strategies::Error),

    #[error("Execution failed: {0}")]
    Execution(#[from] execution::Error),

    #[error("Market data unavailable: {0}")]
    MarketData(#[from] market_data::Error),

    #[error("Persistence failed: {0}")]
    Database(#[from] database::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
