// In crates/market-data/src/simulated.rs

//! A random-walk market for running the engine without a data service.
//!
//! Each watched token follows a geometric random walk. Indicators are
//! computed from the generated closes with the `ta` crate, exactly as they
//! would be from real candles.

use crate::types::{FeedSettings, WatchedToken};
use crate::{Error, MarketDataProvider, Result};
use async_trait::async_trait;
use chrono::Utc;
use core_types::{MarketData, TechnicalIndicators};
use num_traits::FromPrimitive;
use parking_lot::RwLock;
use rand::prelude::*;
use rand_distr::Normal;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use ta::Next;
use ta::indicators::{
    BollingerBands, ExponentialMovingAverage as Ema, MovingAverageConvergenceDivergence as Macd,
    RelativeStrengthIndex as Rsi, SimpleMovingAverage as Sma, StandardDeviation,
};
use tokio::sync::watch;

/// Indicator state for one token.
#[derive(Debug, Clone)]
struct Indicators {
    rsi: Rsi,
    bands: BollingerBands,
    sma_20: Sma,
    sma_50: Sma,
    ema_12: Ema,
    ema_26: Ema,
    macd: Macd,
    volume: Sma,
    returns: StandardDeviation,
}

impl Indicators {
    fn new() -> Result<Self> {
        let bad = |e: ta::errors::TaError| Error::InvalidConfig(format!("indicator parameters: {e:?}"));
        Ok(Self {
            rsi: Rsi::new(14).map_err(bad)?,
            bands: BollingerBands::new(20, 2.0).map_err(bad)?,
            sma_20: Sma::new(20).map_err(bad)?,
            sma_50: Sma::new(50).map_err(bad)?,
            ema_12: Ema::new(12).map_err(bad)?,
            ema_26: Ema::new(26).map_err(bad)?,
            macd: Macd::new(12, 26, 9).map_err(bad)?,
            volume: Sma::new(20).map_err(bad)?,
            returns: StandardDeviation::new(20).map_err(bad)?,
        })
    }
}

#[derive(Debug, Clone)]
struct Series {
    symbol: String,
    tick_volume: f64,
    price: f64,
    /// (close, volume) for the last `steps_per_day` steps.
    window: VecDeque<(f64, f64)>,
    indicators: Indicators,
    latest: TechnicalIndicators,
    return_stddev: f64,
}

struct FeedState {
    series: HashMap<String, Series>,
    rng: StdRng,
}

/// The simulated feed. Call [`SimulatedFeed::step`] (or spawn
/// [`SimulatedFeed::run`]) to move prices.
pub struct SimulatedFeed {
    state: RwLock<FeedState>,
    returns: Normal<f64>,
    volumes: Normal<f64>,
    steps_per_day: usize,
    step_interval: Duration,
}

impl SimulatedFeed {
    pub fn new(settings: &FeedSettings, watchlist: &[WatchedToken]) -> Result<Self> {
        if settings.steps_per_day == 0 {
            return Err(Error::InvalidConfig("steps_per_day must be positive".to_string()));
        }
        let returns = Normal::new(settings.drift, settings.step_volatility)
            .map_err(|e| Error::InvalidConfig(format!("step_volatility: {e}")))?;
        let volumes = Normal::new(1.0, 0.35).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut series = HashMap::new();
        for token in watchlist {
            if token.initial_price <= 0.0 {
                return Err(Error::InvalidConfig(format!("{} needs a positive initial price", token.symbol)));
            }
            series.insert(
                token.address.to_ascii_lowercase(),
                Series {
                    symbol: token.symbol.clone(),
                    tick_volume: token.tick_volume,
                    price: token.initial_price,
                    window: VecDeque::with_capacity(settings.steps_per_day + 1),
                    indicators: Indicators::new()?,
                    latest: TechnicalIndicators::default(),
                    return_stddev: 0.0,
                },
            );
        }

        let feed = Self {
            state: RwLock::new(FeedState { series, rng }),
            returns,
            volumes,
            steps_per_day: settings.steps_per_day,
            step_interval: Duration::from_secs(settings.step_interval_secs.max(1)),
        };
        for _ in 0..settings.warmup_steps {
            feed.step();
        }
        Ok(feed)
    }

    /// Advances every token by one step.
    pub fn step(&self) {
        let mut state = self.state.write();
        let FeedState { series, rng } = &mut *state;
        for s in series.values_mut() {
            let log_return = self.returns.sample(rng);
            let volume = s.tick_volume * self.volumes.sample(rng).max(0.05);
            s.price *= log_return.exp();

            let close = s.price;
            let i = &mut s.indicators;
            let bands = i.bands.next(close);
            let macd = i.macd.next(close);
            let avg_volume = i.volume.next(volume);
            s.return_stddev = i.returns.next(log_return);

            s.window.push_back((close, volume));
            while s.window.len() > self.steps_per_day {
                s.window.pop_front();
            }
            let (pv, v) = s.window.iter().fold((0.0, 0.0), |(pv, v), (p, vol)| (pv + p * vol, v + vol));

            s.latest = TechnicalIndicators {
                rsi: i.rsi.next(close),
                macd: macd.macd,
                macd_signal: macd.signal,
                bollinger_upper: bands.upper,
                bollinger_lower: bands.lower,
                sma_20: i.sma_20.next(close),
                sma_50: i.sma_50.next(close),
                ema_12: i.ema_12.next(close),
                ema_26: i.ema_26.next(close),
                // Average per-step volume scaled to a day so it compares with volume_24h.
                volume: avg_volume * self.steps_per_day as f64,
                vwap: if v > 0.0 { pv / v } else { close },
            };
        }
    }

    /// Steps on a timer until `shutdown` flips to `true`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.step_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => self.step(),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Simulated feed stopped.");
                        return;
                    }
                }
            }
        }
    }

    fn snapshot(&self, token: &str, s: &Series) -> MarketData {
        let open = s.window.front().map(|(p, _)| *p).unwrap_or(s.price);
        let volume_24h: f64 = s.window.iter().map(|(_, v)| v).sum();
        let price = Decimal::from_f64(s.price).unwrap_or_default().round_dp(8);

        MarketData {
            token_address: token.to_string(),
            symbol: s.symbol.clone(),
            price,
            volume_24h: Decimal::from_f64(volume_24h).unwrap_or_default().round_dp(2),
            market_cap: Decimal::ZERO,
            price_change_24h: if open > 0.0 { (s.price / open - 1.0) * 100.0 } else { 0.0 },
            liquidity: Decimal::from_f64(volume_24h * s.price).unwrap_or_default().round_dp(2),
            volatility: s.return_stddev * ((self.steps_per_day * 365) as f64).sqrt(),
            technical_indicators: s.latest.clone(),
            timestamp: Utc::now(),
        }
    }
}

#[async_trait]
impl MarketDataProvider for SimulatedFeed {
    async fn get_market_data(&self, token: &str) -> Result<MarketData> {
        let key = token.to_ascii_lowercase();
        let state = self.state.read();
        state
            .series
            .get(&key)
            .map(|s| self.snapshot(&key, s))
            .ok_or_else(|| Error::NotFound(token.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watchlist() -> Vec<WatchedToken> {
        vec![WatchedToken {
            address: "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2".to_string(),
            symbol: "WETH".to_string(),
            initial_price: 2500.0,
            tick_volume: 50.0,
        }]
    }

    fn settings(seed: u64) -> FeedSettings {
        FeedSettings {
            seed: Some(seed),
            warmup_steps: 100,
            ..FeedSettings::default()
        }
    }

    #[tokio::test]
    async fn warm_feed_has_usable_indicators() {
        let feed = SimulatedFeed::new(&settings(7), &watchlist()).unwrap();
        let data = feed
            .get_market_data("0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2")
            .await
            .unwrap();
        let ind = &data.technical_indicators;
        assert!(data.price > Decimal::ZERO);
        assert!((0.0..=100.0).contains(&ind.rsi));
        assert!(ind.bollinger_upper >= ind.bollinger_lower);
        assert!(ind.volume > 0.0);
        assert!(data.volatility > 0.0);
    }

    #[tokio::test]
    async fn same_seed_same_path() {
        let a = SimulatedFeed::new(&settings(42), &watchlist()).unwrap();
        let b = SimulatedFeed::new(&settings(42), &watchlist()).unwrap();
        let token = "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2";
        assert_eq!(
            a.get_market_data(token).await.unwrap().price,
            b.get_market_data(token).await.unwrap().price
        );
    }

    #[test]
    fn rejects_bad_configuration() {
        let mut bad = watchlist();
        bad[0].initial_price = 0.0;
        assert!(SimulatedFeed::new(&settings(1), &bad).is_err());
    }
}
