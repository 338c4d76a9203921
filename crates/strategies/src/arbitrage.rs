// In crates/strategies/src/arbitrage.rs

use crate::types::ArbitrageSettings;
use crate::{SignalDraft, Strategy, build_signal};
use core_types::{MarketData, RiskLevel, SignalAction, TradingSignal, Urgency};
use std::collections::HashMap;

/// Cross-venue arbitrage.
///
/// Detecting price differences needs quotes from more than one venue and the
/// market data port only carries one, so this strategy always holds.
#[derive(Debug, Clone)]
pub struct Arbitrage {
    settings: ArbitrageSettings,
    quote_token: String,
}

impl Arbitrage {
    pub fn new(settings: ArbitrageSettings, quote_token: &str) -> Self {
        Self {
            settings,
            quote_token: quote_token.to_string(),
        }
    }
}

impl Strategy for Arbitrage {
    fn name(&self) -> &'static str {
        "arbitrage"
    }

    fn description(&self) -> &'static str {
        "Captures price differences between venues"
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Conservative
    }

    fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::to_value(&self.settings).unwrap_or_default()
    }

    fn analyze(&self, market: &MarketData) -> Option<TradingSignal> {
        Some(build_signal(
            self.name(),
            &self.quote_token,
            market,
            SignalDraft {
                action: SignalAction::Hold,
                confidence: 0.0,
                urgency: Urgency::Low,
                amount_in: 0.0,
                stop_loss: None,
                take_profit: None,
                ttl_secs: 0,
                metadata: HashMap::new(),
            },
        ))
    }
}
