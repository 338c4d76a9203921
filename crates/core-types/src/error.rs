// In crates/core-types/src/error.rs

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Unknown signal action: {0}")]
    UnknownAction(String),

    #[error("Unknown risk level: {0}")]
    UnknownRiskLevel(String),

    #[error("Unknown safety grade: {0}")]
    UnknownGrade(String),
}

pub type Result<T> = std::result::Result<T, Error>;
