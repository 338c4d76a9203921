// In crates/market-data/src/http.rs

use crate::{Error, MarketDataProvider, Result};
use async_trait::async_trait;
use core_types::MarketData;
use std::time::Duration;

/// Polls a market data service that serves `GET {base_url}/market-data/{token}`
/// as a JSON `MarketData` document.
#[derive(Debug, Clone)]
pub struct HttpMarketData {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpMarketData {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn url_for(&self, token: &str) -> String {
        format!("{}/market-data/{}", self.base_url, token.to_ascii_lowercase())
    }
}

#[async_trait]
impl MarketDataProvider for HttpMarketData {
    async fn get_market_data(&self, token: &str) -> Result<MarketData> {
        let response = self.http_client.get(self.url_for(token)).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(token.to_string()));
        }
        if !status.is_success() {
            return Err(Error::BadStatus {
                token: token.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.json::<MarketData>().await?)
    }
}
