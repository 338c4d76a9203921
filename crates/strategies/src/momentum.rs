// In crates/strategies/src/momentum.rs

use crate::types::MomentumSettings;
use crate::{Error, Result, SignalDraft, Strategy, build_signal, offset_price, validate_common};
use core_types::{MarketData, RiskLevel, SignalAction, TradingSignal, Urgency};
use serde_json::json;
use std::collections::HashMap;

/// Rides strong 24h moves once RSI and volume confirm them.
///
/// A buy needs a rise above the threshold, an oversold RSI and above-average
/// volume; a sell is the mirror image. A MACD crossing in the same direction
/// is not required but raises confidence.
#[derive(Debug, Clone)]
pub struct Momentum {
    settings: MomentumSettings,
    quote_token: String,
}

impl Momentum {
    pub fn new(settings: MomentumSettings, quote_token: &str) -> Self {
        Self {
            settings,
            quote_token: quote_token.to_string(),
        }
    }
}

impl Strategy for Momentum {
    fn name(&self) -> &'static str {
        "momentum"
    }

    fn description(&self) -> &'static str {
        "Trades in the direction of strong 24h price moves confirmed by RSI and volume"
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Aggressive
    }

    fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::to_value(&self.settings).unwrap_or_default()
    }

    fn analyze(&self, market: &MarketData) -> Option<TradingSignal> {
        let s = &self.settings;
        let indicators = &market.technical_indicators;
        let change = market.price_change_24h;
        let volume_ratio = market.volume_ratio();
        let volume_confirms = volume_ratio >= s.volume_ratio_threshold;

        let (action, rsi_confirms, macd_confirms) = if change > s.price_change_threshold {
            (
                SignalAction::Buy,
                indicators.rsi < s.rsi_oversold,
                indicators.macd > indicators.macd_signal,
            )
        } else if change < -s.price_change_threshold {
            (
                SignalAction::Sell,
                indicators.rsi > s.rsi_overbought,
                indicators.macd < indicators.macd_signal,
            )
        } else {
            return None;
        };

        if !(rsi_confirms && volume_confirms) {
            tracing::debug!(
                token = %market.symbol,
                change,
                rsi = indicators.rsi,
                volume_ratio,
                "Momentum not confirmed."
            );
            return None;
        }

        // Momentum, RSI and volume already agree; MACD is the fourth vote.
        let agreeing = 3 + usize::from(macd_confirms);
        let confidence = (0.5 + 0.4 * agreeing as f64 / 4.0).min(0.95);
        let urgency = if macd_confirms { Urgency::High } else { Urgency::Medium };

        let (stop_loss, take_profit) = match action {
            SignalAction::Buy => (
                offset_price(market.price, -s.stop_loss_pct),
                offset_price(market.price, s.take_profit_pct),
            ),
            _ => (None, None),
        };

        let metadata = HashMap::from([
            ("price_change_24h".to_string(), json!(change)),
            ("rsi".to_string(), json!(indicators.rsi)),
            ("volume_ratio".to_string(), json!(volume_ratio)),
            ("macd_confirms".to_string(), json!(macd_confirms)),
        ]);

        Some(build_signal(
            self.name(),
            &self.quote_token,
            market,
            SignalDraft {
                action,
                confidence,
                urgency,
                amount_in: s.base_amount,
                stop_loss,
                take_profit,
                ttl_secs: s.signal_ttl_secs,
                metadata,
            },
        ))
    }

    fn validate_signal(&self, signal: &TradingSignal) -> Result<()> {
        validate_common(self.name(), signal)?;
        if !matches!(signal.action, SignalAction::Buy | SignalAction::Sell) {
            return Err(Error::InvalidSignal {
                strategy: self.name().to_string(),
                reason: format!("momentum does not emit {} signals", signal.action),
            });
        }
        if signal.confidence < self.settings.min_confidence {
            return Err(Error::InvalidSignal {
                strategy: self.name().to_string(),
                reason: format!(
                    "confidence {:.2} below minimum {:.2}",
                    signal.confidence, self.settings.min_confidence
                ),
            });
        }
        Ok(())
    }
}
