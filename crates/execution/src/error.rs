// In crates/execution/src/error.rs

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Execution failed: {reason}")]
    ExecutionFailed { reason: String },

    #[error("Invalid order: {0}")]
    InvalidOrder(String),
}

pub type Result<T> = std::result::Result<T, Error>;
