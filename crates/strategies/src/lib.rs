// In crates/strategies/src/lib.rs

use chrono::{Duration, Utc};
use core_types::{MarketData, Portfolio, RiskLevel, SignalAction, TradingSignal, Urgency};
use num_traits::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;

pub mod arbitrage;
pub mod error;
pub mod factory;
pub mod mean_reversion;
pub mod momentum;
pub mod types;

pub use error::{Error, Result};
pub use factory::{create_strategies, create_strategy};

/// The universal interface for a trading strategy.
///
/// A strategy turns one market observation into at most one `TradingSignal`.
/// Strategies are shared across portfolios and ticks, so they hold no mutable
/// state; everything they need arrives in `MarketData`.
pub trait Strategy: Send + Sync {
    /// The name portfolios refer to this strategy by in their allow-lists.
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn risk_level(&self) -> RiskLevel;

    fn is_enabled(&self) -> bool;

    /// The strategy's tunables, for display and persistence.
    fn parameters(&self) -> serde_json::Value;

    /// Inspects `market` and proposes a trade. `None` means no opinion.
    fn analyze(&self, market: &MarketData) -> Option<TradingSignal>;

    /// Strategy-specific sanity checks on a signal before it reaches the risk gate.
    fn validate_signal(&self, signal: &TradingSignal) -> Result<()> {
        validate_common(self.name(), signal)
    }

    /// How much quote to commit to `signal` for `portfolio`.
    ///
    /// The allowance is `max_position_size × total_value`, scaled by the signal's
    /// confidence and the profile's size multiplier. The result never exceeds the
    /// proposed amount, the full allowance, or what the portfolio can fund: cash
    /// for a buy, the holding's value for a sell.
    fn calculate_position_size(&self, signal: &TradingSignal, portfolio: &Portfolio) -> Decimal {
        let allowance = portfolio.total_value * portfolio.risk_profile.max_position_size;
        let confidence = Decimal::from_f64(signal.confidence).unwrap_or_default();
        let scaled = allowance * confidence * portfolio.risk_profile.size_multiplier();

        let funding = match signal.action {
            SignalAction::Sell | SignalAction::Unstake => portfolio
                .holdings
                .get(&signal.target_token().to_ascii_lowercase())
                .map(|h| h.value)
                .unwrap_or_default(),
            _ => portfolio.available_balance,
        };

        signal
            .amount_in
            .min(scaled)
            .min(allowance)
            .min(funding)
            .max(Decimal::ZERO)
    }
}

/// Checks every strategy applies regardless of its own rules.
pub fn validate_common(strategy: &str, signal: &TradingSignal) -> Result<()> {
    let reject = |reason: &str| {
        Err(Error::InvalidSignal {
            strategy: strategy.to_string(),
            reason: reason.to_string(),
        })
    };

    if signal.strategy != strategy {
        return reject("signal was produced by a different strategy");
    }
    if !(0.0..=1.0).contains(&signal.confidence) {
        return reject("confidence must lie in [0, 1]");
    }
    if signal.amount_in <= Decimal::ZERO {
        return reject("amount must be positive");
    }
    if signal.token_in.is_empty() || signal.token_out.is_empty() {
        return reject("token addresses must be set");
    }
    if signal.token_in.eq_ignore_ascii_case(&signal.token_out) {
        return reject("token in and token out are the same");
    }
    if signal.is_expired(Utc::now()) {
        return reject("signal has expired");
    }
    Ok(())
}

/// The parts of a signal that vary between strategies.
pub(crate) struct SignalDraft {
    pub action: SignalAction,
    pub confidence: f64,
    pub urgency: Urgency,
    pub amount_in: f64,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub ttl_secs: i64,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Builds a signal trading `market.token_address` against `quote_token`.
pub(crate) fn build_signal(strategy: &str, quote_token: &str, market: &MarketData, draft: SignalDraft) -> TradingSignal {
    let amount_in = Decimal::from_f64(draft.amount_in).unwrap_or_default();
    let (token_in, token_out, expected_out) = match draft.action {
        SignalAction::Sell | SignalAction::Unstake => {
            (market.token_address.clone(), quote_token.to_string(), amount_in)
        }
        _ => {
            let expected = if market.price > Decimal::ZERO {
                amount_in / market.price
            } else {
                Decimal::ZERO
            };
            (quote_token.to_string(), market.token_address.clone(), expected)
        }
    };

    TradingSignal {
        id: core_types::new_id(),
        strategy: strategy.to_string(),
        action: draft.action,
        token_in,
        token_out,
        amount_in,
        expected_out,
        confidence: draft.confidence.clamp(0.0, 1.0),
        urgency: draft.urgency,
        valid_until: Utc::now() + Duration::seconds(draft.ttl_secs),
        stop_loss: draft.stop_loss,
        take_profit: draft.take_profit,
        metadata: draft.metadata,
    }
}

/// `price × (1 + fraction)`, for stop-loss and take-profit levels.
pub(crate) fn offset_price(price: Decimal, fraction: f64) -> Option<Decimal> {
    Decimal::from_f64(1.0 + fraction).map(|factor| price * factor)
}
