// In crates/engine/src/rebalance.rs

//! Target-allocation rebalancing: creation rules, trigger evaluation and the
//! buy/sell plan that moves a portfolio back toward its targets.

use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use core_types::{MarketData, Portfolio, Side};
use num_traits::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// How far the target fractions may stray from 1.0 in total.
pub const ALLOCATION_TOLERANCE: Decimal = dec!(0.000001);

/// Smallest trade a rebalance will bother with when no constraint says otherwise.
pub const DEFAULT_MIN_TRADE_AMOUNT: Decimal = dec!(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebalanceStrategyType {
    Fixed,
    Dynamic,
    RiskParity,
    Momentum,
    MeanRevert,
}

impl fmt::Display for RebalanceStrategyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RebalanceStrategyType::Fixed => "fixed",
            RebalanceStrategyType::Dynamic => "dynamic",
            RebalanceStrategyType::RiskParity => "risk_parity",
            RebalanceStrategyType::Momentum => "momentum",
            RebalanceStrategyType::MeanRevert => "mean_revert",
        };
        f.write_str(name)
    }
}

impl FromStr for RebalanceStrategyType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Ok(RebalanceStrategyType::Fixed),
            "dynamic" => Ok(RebalanceStrategyType::Dynamic),
            "risk_parity" => Ok(RebalanceStrategyType::RiskParity),
            "momentum" => Ok(RebalanceStrategyType::Momentum),
            "mean_revert" => Ok(RebalanceStrategyType::MeanRevert),
            other => Err(Error::InvalidRebalance(format!("unknown rebalance type: {other}"))),
        }
    }
}

/// A condition that, when met, starts a rebalance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerCondition {
    /// Some target's allocation is off by more than `threshold`.
    Drift { threshold: Decimal },
    /// At least `interval_secs` have passed since the last rebalance.
    Time { interval_secs: i64 },
    /// Some target's annualised volatility exceeds `threshold`.
    Volatility { threshold: f64 },
    /// A held target, or the whole portfolio today, is down by `threshold` or more.
    Drawdown { threshold: Decimal },
    /// The share of targets moving in the same direction over 24h reaches `threshold`.
    Correlation { threshold: f64 },
    /// A held target is up by `threshold` or more on its cost.
    Profit { threshold: Decimal },
}

impl TriggerCondition {
    pub fn name(&self) -> &'static str {
        match self {
            TriggerCondition::Drift { .. } => "drift",
            TriggerCondition::Time { .. } => "time",
            TriggerCondition::Volatility { .. } => "volatility",
            TriggerCondition::Drawdown { .. } => "drawdown",
            TriggerCondition::Correlation { .. } => "correlation",
            TriggerCondition::Profit { .. } => "profit",
        }
    }

    /// The trigger set each strategy type starts with.
    pub fn defaults_for(strategy_type: RebalanceStrategyType) -> Vec<Self> {
        const WEEK: i64 = 7 * 24 * 60 * 60;
        match strategy_type {
            RebalanceStrategyType::Fixed => vec![
                TriggerCondition::Drift { threshold: dec!(0.05) },
                TriggerCondition::Time { interval_secs: WEEK },
            ],
            RebalanceStrategyType::Dynamic => vec![
                TriggerCondition::Drift { threshold: dec!(0.03) },
                TriggerCondition::Volatility { threshold: 0.8 },
                TriggerCondition::Correlation { threshold: 0.9 },
            ],
            RebalanceStrategyType::RiskParity => vec![
                TriggerCondition::Drift { threshold: dec!(0.05) },
                TriggerCondition::Volatility { threshold: 1.0 },
            ],
            RebalanceStrategyType::Momentum => vec![
                TriggerCondition::Drift { threshold: dec!(0.10) },
                TriggerCondition::Profit { threshold: dec!(0.20) },
            ],
            RebalanceStrategyType::MeanRevert => vec![
                TriggerCondition::Drift { threshold: dec!(0.05) },
                TriggerCondition::Drawdown { threshold: dec!(0.10) },
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Constraint {
    /// Differences worth less than `amount` of quote are left alone.
    MinTradeAmount { amount: Decimal },
    /// Caps the target for `token` at `max` of total value.
    MaxAllocation { token: String, max: Decimal },
}

/// A single trade proposed by a rebalance. `amount` is in quote currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceAction {
    pub token: String,
    pub side: Side,
    pub amount: Decimal,
    pub current_allocation: Decimal,
    pub target_allocation: Decimal,
    /// Set when the bought tokens are to be deposited into a yield protocol.
    pub protocol: Option<String>,
}

/// A portfolio's target allocation and the rules for when to restore it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceStrategy {
    pub id: String,
    pub portfolio_id: String,
    pub name: String,
    pub strategy_type: RebalanceStrategyType,
    /// Token → fraction of total value. Keys are lowercase addresses.
    pub target_allocations: HashMap<String, Decimal>,
    pub constraints: Vec<Constraint>,
    pub triggers: Vec<TriggerCondition>,
    /// Token → protocol its rebalance buys are deposited into.
    pub yield_targets: HashMap<String, String>,
    pub is_active: bool,
    pub last_rebalance: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl RebalanceStrategy {
    /// Validates the targets and attaches the type's default triggers.
    pub fn new(
        portfolio_id: &str,
        name: &str,
        strategy_type: RebalanceStrategyType,
        target_allocations: HashMap<String, Decimal>,
    ) -> Result<Self> {
        if let Some((token, fraction)) = target_allocations
            .iter()
            .find(|(_, f)| **f < Decimal::ZERO || **f > Decimal::ONE)
        {
            return Err(Error::InvalidRebalance(format!(
                "allocation for {token} must lie in [0, 1], got {fraction}"
            )));
        }

        let sum: Decimal = target_allocations.values().sum();
        if (sum - Decimal::ONE).abs() > ALLOCATION_TOLERANCE {
            return Err(Error::InvalidAllocation {
                sum: sum.to_f64().unwrap_or(f64::NAN),
            });
        }

        Ok(Self {
            id: core_types::new_id(),
            portfolio_id: portfolio_id.to_string(),
            name: name.to_string(),
            strategy_type,
            target_allocations: target_allocations
                .into_iter()
                .map(|(token, fraction)| (token.to_ascii_lowercase(), fraction))
                .collect(),
            constraints: vec![Constraint::MinTradeAmount { amount: DEFAULT_MIN_TRADE_AMOUNT }],
            triggers: TriggerCondition::defaults_for(strategy_type),
            yield_targets: HashMap::new(),
            is_active: true,
            last_rebalance: None,
            created_at: Utc::now(),
        })
    }

    /// Adds a constraint, replacing the previous minimum trade amount if `constraint` is one.
    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        if matches!(constraint, Constraint::MinTradeAmount { .. }) {
            self.constraints
                .retain(|c| !matches!(c, Constraint::MinTradeAmount { .. }));
        }
        self.constraints.push(constraint);
        self
    }

    pub fn with_triggers(mut self, triggers: Vec<TriggerCondition>) -> Self {
        self.triggers = triggers;
        self
    }

    pub fn with_yield_target(mut self, token: &str, protocol: &str) -> Self {
        self.yield_targets
            .insert(token.to_ascii_lowercase(), protocol.to_string());
        self
    }

    pub fn min_trade_amount(&self) -> Decimal {
        self.constraints
            .iter()
            .find_map(|c| match c {
                Constraint::MinTradeAmount { amount } => Some(*amount),
                _ => None,
            })
            .unwrap_or(DEFAULT_MIN_TRADE_AMOUNT)
    }

    /// The effective target for `token` after allocation caps.
    pub fn target_for(&self, token: &str) -> Decimal {
        let target = self
            .target_allocations
            .get(token)
            .copied()
            .unwrap_or_default();
        self.constraints.iter().fold(target, |target, c| match c {
            Constraint::MaxAllocation { token: capped, max } if capped.eq_ignore_ascii_case(token) => {
                target.min(*max)
            }
            _ => target,
        })
    }

    /// Target tokens other than the quote currency.
    fn traded_targets<'a>(&'a self, quote_token: &'a str) -> impl Iterator<Item = &'a String> + 'a {
        self.target_allocations
            .keys()
            .filter(move |token| !token.eq_ignore_ascii_case(quote_token))
    }

    /// Names of the triggers that currently fire. Empty means no rebalance is due.
    pub fn fired_triggers(
        &self,
        portfolio: &Portfolio,
        markets: &HashMap<String, MarketData>,
        quote_token: &str,
        now: DateTime<Utc>,
    ) -> Vec<&'static str> {
        let allocations = portfolio.allocations();
        let targets: Vec<&String> = self.traded_targets(quote_token).collect();

        self.triggers
            .iter()
            .filter(|trigger| match trigger {
                TriggerCondition::Drift { threshold } => targets.iter().any(|token| {
                    let current = allocations.get(*token).copied().unwrap_or_default();
                    (self.target_for(token) - current).abs() > *threshold
                }),
                TriggerCondition::Time { interval_secs } => {
                    let since = self.last_rebalance.unwrap_or(self.created_at);
                    now - since >= Duration::seconds(*interval_secs)
                }
                TriggerCondition::Volatility { threshold } => targets
                    .iter()
                    .filter_map(|token| markets.get(*token))
                    .any(|m| m.volatility > *threshold),
                TriggerCondition::Drawdown { threshold } => {
                    let portfolio_down = portfolio.total_value > Decimal::ZERO
                        && portfolio.daily_pnl / portfolio.total_value <= -*threshold;
                    portfolio_down
                        || targets
                            .iter()
                            .filter_map(|token| holding_return(portfolio, token))
                            .any(|r| r <= -*threshold)
                }
                TriggerCondition::Profit { threshold } => targets
                    .iter()
                    .filter_map(|token| holding_return(portfolio, token))
                    .any(|r| r >= *threshold),
                TriggerCondition::Correlation { threshold } => {
                    let changes: Vec<f64> = targets
                        .iter()
                        .filter_map(|token| markets.get(*token))
                        .map(|m| m.price_change_24h)
                        .collect();
                    co_movement(&changes).is_some_and(|share| share >= *threshold)
                }
            })
            .map(TriggerCondition::name)
            .collect()
    }

    /// The trades that bring `portfolio` back to target, sells first.
    pub fn plan(&self, portfolio: &Portfolio, quote_token: &str) -> Vec<RebalanceAction> {
        let total = portfolio.total_value;
        if total <= Decimal::ZERO {
            return Vec::new();
        }
        let allocations = portfolio.allocations();
        let floor = self.min_trade_amount();

        let mut actions: Vec<RebalanceAction> = self
            .traded_targets(quote_token)
            .filter_map(|token| {
                let current = allocations.get(token).copied().unwrap_or_default();
                let target = self.target_for(token);
                let diff = target - current;
                let amount = (diff.abs() * total).round_dp(8);
                if amount.is_zero() || amount < floor {
                    return None;
                }
                let side = if diff > Decimal::ZERO { Side::Buy } else { Side::Sell };
                Some(RebalanceAction {
                    token: token.clone(),
                    side,
                    amount,
                    current_allocation: current,
                    target_allocation: target,
                    protocol: match side {
                        Side::Buy => self.yield_targets.get(token).cloned(),
                        Side::Sell => None,
                    },
                })
            })
            .collect();

        // Sells free the cash the buys spend.
        actions.sort_by(|a, b| {
            let rank = |s: Side| if s == Side::Sell { 0 } else { 1 };
            rank(a.side).cmp(&rank(b.side)).then_with(|| a.token.cmp(&b.token))
        });
        actions
    }
}

/// Return on cost of the holding of `token`, if there is one.
fn holding_return(portfolio: &Portfolio, token: &str) -> Option<Decimal> {
    let holding = portfolio.holdings.get(token)?;
    let cost = holding.average_price * holding.amount;
    (cost > Decimal::ZERO).then(|| holding.pnl / cost)
}

/// Fraction of `changes` sharing the majority direction. Needs two movers.
fn co_movement(changes: &[f64]) -> Option<f64> {
    if changes.len() < 2 {
        return None;
    }
    let up = changes.iter().filter(|c| **c > 0.0).count();
    let down = changes.iter().filter(|c| **c < 0.0).count();
    Some(up.max(down) as f64 / changes.len() as f64)
}
