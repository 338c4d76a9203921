// In crates/core-types/src/portfolio.rs

use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Conservative,
    Moderate,
    Aggressive,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RiskLevel::Conservative => "conservative",
            RiskLevel::Moderate => "moderate",
            RiskLevel::Aggressive => "aggressive",
        };
        f.write_str(name)
    }
}

impl FromStr for RiskLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "conservative" | "low" => Ok(RiskLevel::Conservative),
            "moderate" | "medium" => Ok(RiskLevel::Moderate),
            "aggressive" | "high" => Ok(RiskLevel::Aggressive),
            other => Err(Error::UnknownRiskLevel(other.to_string())),
        }
    }
}

/// Portfolio-level limits. All fractions are relative to `Portfolio::total_value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskProfile {
    pub risk_level: RiskLevel,
    pub max_position_size: Decimal,
    pub max_daily_loss: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    /// Empty means every strategy on the portfolio's own allow-list is permitted.
    #[serde(default)]
    pub allowed_strategies: Vec<String>,
}

impl RiskProfile {
    /// The stock limits for each risk level.
    pub fn for_level(risk_level: RiskLevel) -> Self {
        let (max_position_size, max_daily_loss, stop_loss, take_profit) = match risk_level {
            RiskLevel::Conservative => (dec!(0.05), dec!(0.02), dec!(0.05), dec!(0.10)),
            RiskLevel::Moderate => (dec!(0.10), dec!(0.05), dec!(0.10), dec!(0.20)),
            RiskLevel::Aggressive => (dec!(0.20), dec!(0.10), dec!(0.15), dec!(0.30)),
        };
        Self {
            risk_level,
            max_position_size,
            max_daily_loss,
            stop_loss,
            take_profit,
            allowed_strategies: Vec::new(),
        }
    }

    /// How much of the position allowance a strategy may use at this risk level.
    pub fn size_multiplier(&self) -> Decimal {
        match self.risk_level {
            RiskLevel::Conservative => dec!(0.5),
            RiskLevel::Moderate => dec!(0.75),
            RiskLevel::Aggressive => dec!(1.0),
        }
    }
}

/// A token held by a portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub token: String,
    pub amount: Decimal,
    pub average_price: Decimal,
    pub current_price: Decimal,
    pub value: Decimal,
    pub pnl: Decimal,
}

impl Holding {
    fn empty(token: &str) -> Self {
        Self {
            token: token.to_string(),
            amount: Decimal::ZERO,
            average_price: Decimal::ZERO,
            current_price: Decimal::ZERO,
            value: Decimal::ZERO,
            pnl: Decimal::ZERO,
        }
    }

    pub fn mark(&mut self, price: Decimal) {
        self.current_price = price;
        self.value = self.amount * price;
        self.pnl = (price - self.average_price) * self.amount;
    }
}

/// A user's aggregate holdings, balance, and limits.
///
/// Invariant: `total_value == available_balance + Σ holding.value`. Every mutating
/// method ends with `revalue()` to restore it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub total_value: Decimal,
    pub available_balance: Decimal,
    pub invested_amount: Decimal,
    pub total_pnl: Decimal,
    pub daily_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub holdings: HashMap<String, Holding>,
    pub active_positions: Vec<String>,
    pub allowed_strategies: Vec<String>,
    pub risk_profile: RiskProfile,
    day_start_value: Decimal,
    day: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Portfolio {
    pub fn new(
        user_id: impl Into<String>,
        name: impl Into<String>,
        initial_balance: Decimal,
        risk_profile: RiskProfile,
        allowed_strategies: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: crate::new_id(),
            user_id: user_id.into(),
            name: name.into(),
            total_value: initial_balance,
            available_balance: initial_balance,
            invested_amount: Decimal::ZERO,
            total_pnl: Decimal::ZERO,
            daily_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            holdings: HashMap::new(),
            active_positions: Vec::new(),
            allowed_strategies,
            risk_profile,
            day_start_value: initial_balance,
            day: now.date_naive(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether `strategy` may trade this portfolio.
    pub fn allows_strategy(&self, strategy: &str) -> bool {
        let on_portfolio_list = self.allowed_strategies.iter().any(|s| s == strategy);
        let on_profile_list = self.risk_profile.allowed_strategies.is_empty()
            || self.risk_profile.allowed_strategies.iter().any(|s| s == strategy);
        on_portfolio_list && on_profile_list
    }

    pub fn holdings_value(&self) -> Decimal {
        self.holdings.values().map(|h| h.value).sum()
    }

    /// Recomputes the derived totals from balance and holdings.
    pub fn revalue(&mut self) {
        self.total_value = self.available_balance + self.holdings_value();
        self.total_pnl = self.realized_pnl + self.holdings.values().map(|h| h.pnl).sum::<Decimal>();
        self.daily_pnl = self.total_value - self.day_start_value;
        self.updated_at = Utc::now();
    }

    /// Starts a new PnL day when `now` falls on a later UTC date.
    pub fn roll_day(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today > self.day {
            self.day = today;
            self.day_start_value = self.total_value;
            self.daily_pnl = Decimal::ZERO;
        }
    }

    /// Books a buy of `quantity` tokens at `fill_price` that cost `quote_spent`.
    ///
    /// The holding's cost basis is the weighted average of the previous basis and
    /// this purchase (fees included).
    pub fn apply_buy(&mut self, token: &str, quantity: Decimal, fill_price: Decimal, quote_spent: Decimal) {
        self.available_balance -= quote_spent;
        self.invested_amount += quote_spent;

        let holding = self
            .holdings
            .entry(token.to_string())
            .or_insert_with(|| Holding::empty(token));
        let new_amount = holding.amount + quantity;
        if new_amount > Decimal::ZERO {
            holding.average_price = (holding.amount * holding.average_price + quote_spent) / new_amount;
        }
        holding.amount = new_amount;
        holding.mark(fill_price);

        self.revalue();
    }

    /// Books a sale of up to `quantity` tokens. Returns `(quantity_sold, realized_pnl)`.
    pub fn apply_sell(
        &mut self,
        token: &str,
        quantity: Decimal,
        fill_price: Decimal,
        quote_received: Decimal,
    ) -> (Decimal, Decimal) {
        let Some(holding) = self.holdings.get_mut(token) else {
            return (Decimal::ZERO, Decimal::ZERO);
        };
        let sold = quantity.min(holding.amount);
        let cost_basis = holding.average_price * sold;
        let realized = quote_received - cost_basis;

        holding.amount -= sold;
        holding.mark(fill_price);
        if holding.amount.is_zero() {
            self.holdings.remove(token);
        }

        self.available_balance += quote_received;
        self.invested_amount = (self.invested_amount - cost_basis).max(Decimal::ZERO);
        self.realized_pnl += realized;
        self.revalue();
        (sold, realized)
    }

    /// Re-prices a holding from fresh market data.
    pub fn mark_token(&mut self, token: &str, price: Decimal) {
        if let Some(holding) = self.holdings.get_mut(token) {
            holding.mark(price);
            self.revalue();
        }
    }

    /// The current weight of each holding in `total_value`.
    pub fn allocations(&self) -> HashMap<String, Decimal> {
        if self.total_value <= Decimal::ZERO {
            return HashMap::new();
        }
        self.holdings
            .iter()
            .map(|(token, h)| (token.clone(), h.value / self.total_value))
            .collect()
    }

    pub fn add_position(&mut self, position_id: &str) {
        if !self.active_positions.iter().any(|p| p == position_id) {
            self.active_positions.push(position_id.to_string());
        }
    }

    pub fn remove_position(&mut self, position_id: &str) {
        self.active_positions.retain(|p| p != position_id);
    }

    /// Checks `total_value ≈ available_balance + Σ holding.value`.
    pub fn invariant_holds(&self, tolerance: Decimal) -> bool {
        (self.total_value - (self.available_balance + self.holdings_value())).abs() <= tolerance
    }
}
