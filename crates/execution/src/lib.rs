// In crates/execution/src/lib.rs

use async_trait::async_trait;
use core_types::Execution;
use rust_decimal::Decimal;

pub mod error;
pub mod simulated;
pub mod types;

// Re-export public types
pub use error::{Error, Result};
pub use simulated::SimulatedExecutor;
pub use types::{OrderRequest, SimulationSettings};

/// The universal interface for an execution handler.
///
/// An `Executor` takes a sized `OrderRequest` and fills it against a venue,
/// which could be a DEX router or a simulation. The trading engine owns all
/// portfolio bookkeeping; executors only report what was filled.
#[async_trait]
pub trait Executor: Send + Sync {
    /// The name of the executor (e.g., "SimulatedExecutor").
    fn name(&self) -> &'static str;

    /// Fills `order` given the latest observed `market_price`.
    async fn execute(&self, order: &OrderRequest, market_price: Decimal) -> Result<Execution>;
}
