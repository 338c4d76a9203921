// In crates/market-data/src/memory.rs

use crate::{Error, MarketDataProvider, Result};
use async_trait::async_trait;
use chrono::Utc;
use core_types::MarketData;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// A provider backed by whatever was last written into it.
#[derive(Debug, Default)]
pub struct InMemoryMarketData {
    quotes: RwLock<HashMap<String, MarketData>>,
}

impl InMemoryMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, data: MarketData) {
        self.quotes.write().insert(data.token_address.to_ascii_lowercase(), data);
    }

    /// Moves the price of an existing quote, leaving its indicators alone.
    pub fn set_price(&self, token: &str, price: Decimal) {
        if let Some(quote) = self.quotes.write().get_mut(&token.to_ascii_lowercase()) {
            quote.price = price;
            quote.timestamp = Utc::now();
        }
    }
}

#[async_trait]
impl MarketDataProvider for InMemoryMarketData {
    async fn get_market_data(&self, token: &str) -> Result<MarketData> {
        self.quotes
            .read()
            .get(&token.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| Error::NotFound(token.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn lookups_ignore_address_case() {
        let store = InMemoryMarketData::new();
        store.set(MarketData::new("0xABC0000000000000000000000000000000000001", "ABC", dec!(3)));
        store.set_price("0xabc0000000000000000000000000000000000001", dec!(4));

        let quote = store
            .get_market_data("0xAbC0000000000000000000000000000000000001")
            .await
            .unwrap();
        assert_eq!(quote.price, dec!(4));
        assert!(matches!(store.get_market_data("0xdef").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn get_many_skips_missing_tokens() {
        let store = InMemoryMarketData::new();
        store.set(MarketData::new("0x01", "ONE", dec!(1)));
        let found = store.get_many(&["0x01".to_string(), "0x02".to_string()]).await;
        assert_eq!(found.len(), 1);
    }
}
