// In crates/market-data/src/types.rs

use serde::{Deserialize, Serialize};

/// A token the engine watches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchedToken {
    pub address: String,
    pub symbol: String,
    /// Starting price for the simulated feed.
    #[serde(default = "default_initial_price")]
    pub initial_price: f64,
    /// Typical traded volume per tick for the simulated feed.
    #[serde(default = "default_tick_volume")]
    pub tick_volume: f64,
}

fn default_initial_price() -> f64 {
    1.0
}

fn default_tick_volume() -> f64 {
    10_000.0
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct FeedSettings {
    /// `simulated` or `http`.
    pub source: String,
    /// Base URL for the HTTP provider, e.g. `http://localhost:8080`.
    pub base_url: Option<String>,
    pub request_timeout_secs: u64,
    /// How often the simulated feed advances one step.
    pub step_interval_secs: u64,
    /// Standard deviation of each step's log return.
    pub step_volatility: f64,
    pub drift: f64,
    /// Steps making up 24 hours, used for the 24h change and volume.
    pub steps_per_day: usize,
    /// Steps simulated up front so indicators start warm.
    pub warmup_steps: usize,
    pub seed: Option<u64>,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            source: "simulated".to_string(),
            base_url: None,
            request_timeout_secs: 10,
            step_interval_secs: 5,
            step_volatility: 0.01,
            drift: 0.0,
            steps_per_day: 288,
            warmup_steps: 300,
            seed: None,
        }
    }
}
