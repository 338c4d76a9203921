// In crates/core-types/src/lib.rs

pub mod error;
pub mod market;
pub mod portfolio;
pub mod position;
pub mod risk;
pub mod signal;
pub mod types;

// Re-export the most important types for easy access from other crates.
pub use error::{Error, Result};
pub use market::{MarketData, TechnicalIndicators};
pub use portfolio::{Holding, Portfolio, RiskLevel, RiskProfile};
pub use position::{Position, PositionStatus};
pub use risk::{RiskAssessment, RiskFactor, SafetyGrade};
pub use signal::{SignalAction, TradingSignal, Urgency};
pub use types::{Execution, Side, new_id};
