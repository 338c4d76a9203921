// In crates/market-data/src/lib.rs

use async_trait::async_trait;
use core_types::MarketData;
use std::sync::Arc;

pub mod error;
pub mod http;
pub mod memory;
pub mod simulated;
pub mod types;

// Re-export public types
pub use error::{Error, Result};
pub use http::HttpMarketData;
pub use memory::InMemoryMarketData;
pub use simulated::SimulatedFeed;
pub use types::{FeedSettings, WatchedToken};

/// The source of market observations the trading engine consumes.
///
/// Staleness and availability are the provider's concern; the engine treats
/// whatever comes back as the current state of the market.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn get_market_data(&self, token: &str) -> Result<MarketData>;

    /// Fetches several tokens, skipping the ones that fail.
    async fn get_many(&self, tokens: &[String]) -> Vec<MarketData> {
        let lookups = tokens.iter().map(|t| self.get_market_data(t));
        futures::future::join_all(lookups)
            .await
            .into_iter()
            .zip(tokens)
            .filter_map(|(result, token)| match result {
                Ok(data) => Some(data),
                Err(e) => {
                    tracing::warn!(token = %token, error = %e, "Market data unavailable.");
                    None
                }
            })
            .collect()
    }
}

/// Builds the provider named by `settings.source`.
pub fn create_provider(settings: &FeedSettings, watchlist: &[WatchedToken]) -> Result<Arc<dyn MarketDataProvider>> {
    match settings.source.as_str() {
        "simulated" => Ok(Arc::new(SimulatedFeed::new(settings, watchlist)?)),
        "http" => {
            let base_url = settings
                .base_url
                .clone()
                .ok_or_else(|| Error::InvalidConfig("http source needs base_url".to_string()))?;
            Ok(Arc::new(HttpMarketData::new(&base_url, settings.request_timeout_secs)?))
        }
        other => Err(Error::InvalidConfig(format!("unknown market data source: {other}"))),
    }
}
