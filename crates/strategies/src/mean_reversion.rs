// In crates/strategies/src/mean_reversion.rs

use crate::types::MeanReversionSettings;
use crate::{Error, Result, SignalDraft, Strategy, build_signal, offset_price, validate_common};
use core_types::{MarketData, RiskLevel, SignalAction, TradingSignal, Urgency};
use num_traits::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::HashMap;

/// Fades moves outside the Bollinger bands when RSI agrees the move is stretched.
#[derive(Debug, Clone)]
pub struct MeanReversion {
    settings: MeanReversionSettings,
    quote_token: String,
}

impl MeanReversion {
    pub fn new(settings: MeanReversionSettings, quote_token: &str) -> Self {
        Self {
            settings,
            quote_token: quote_token.to_string(),
        }
    }
}

impl Strategy for MeanReversion {
    fn name(&self) -> &'static str {
        "mean_reversion"
    }

    fn description(&self) -> &'static str {
        "Sells above the upper Bollinger band when overbought and buys below the lower band when oversold"
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Moderate
    }

    fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::to_value(&self.settings).unwrap_or_default()
    }

    fn analyze(&self, market: &MarketData) -> Option<TradingSignal> {
        let s = &self.settings;
        let ind = &market.technical_indicators;
        let price = market.price.to_f64()?;
        let width = ind.bollinger_upper - ind.bollinger_lower;
        if ind.bollinger_upper <= 0.0 || width <= 0.0 {
            // Bands not warmed up yet.
            return None;
        }

        let (action, excess) = if price > ind.bollinger_upper && ind.rsi > s.rsi_overbought {
            (SignalAction::Sell, (price - ind.bollinger_upper) / width)
        } else if price < ind.bollinger_lower && ind.rsi < s.rsi_oversold {
            (SignalAction::Buy, (ind.bollinger_lower - price) / width)
        } else {
            return None;
        };

        let confidence = (0.6 + 0.3 * excess.min(1.0)).min(0.95);
        let urgency = if excess > 0.5 { Urgency::High } else { Urgency::Medium };

        let (stop_loss, take_profit) = match action {
            SignalAction::Buy => {
                // The middle band is the natural exit when it sits above the entry.
                let middle = Decimal::from_f64(ind.sma_20).filter(|m| *m > market.price);
                (
                    offset_price(market.price, -s.stop_loss_pct),
                    middle.or_else(|| offset_price(market.price, s.take_profit_pct)),
                )
            }
            _ => (None, None),
        };

        let metadata = HashMap::from([
            ("rsi".to_string(), json!(ind.rsi)),
            ("bollinger_upper".to_string(), json!(ind.bollinger_upper)),
            ("bollinger_lower".to_string(), json!(ind.bollinger_lower)),
            ("band_excess".to_string(), json!(excess)),
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
        if signal.confidence < self.settings.min_confidence {
            return Err(Error::InvalidSignal {
                strategy: self.name().to_string(),
                reason: format!("confidence {:.2} below minimum", signal.confidence),
            });
        }
        if let (Some(sl), Some(tp)) = (signal.stop_loss, signal.take_profit) {
            if sl >= tp {
                return Err(Error::InvalidSignal {
                    strategy: self.name().to_string(),
                    reason: "stop loss must sit below take profit".to_string(),
                });
            }
        }
        Ok(())
    }
}
