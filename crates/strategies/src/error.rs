// In crates/strategies/src/error.rs

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Signal from {strategy} rejected: {reason}")]
    InvalidSignal { strategy: String, reason: String },

    #[error("Attempted to create unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("Invalid settings for {strategy}: {reason}")]
    InvalidSettings { strategy: String, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
