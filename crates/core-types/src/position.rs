// In crates/core-types/src/position.rs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Lifecycle of a position: `Pending → Open → Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Pending,
    Open,
    Closed,
}

/// A held amount of a token opened by the trading engine under one strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub user_id: String,
    pub portfolio_id: String,
    pub strategy: String,
    pub token: String,
    /// Token units held by this position.
    pub amount: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    /// Creates a position in the `Pending` state, before its trade is confirmed.
    pub fn pending(
        user_id: impl Into<String>,
        portfolio_id: impl Into<String>,
        strategy: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            id: crate::new_id(),
            user_id: user_id.into(),
            portfolio_id: portfolio_id.into(),
            strategy: strategy.into(),
            token: token.into(),
            amount: Decimal::ZERO,
            entry_price: Decimal::ZERO,
            current_price: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            stop_loss: None,
            take_profit: None,
            status: PositionStatus::Pending,
            opened_at: Utc::now(),
            closed_at: None,
        }
    }

    /// Moves a pending position to `Open` at the confirmed fill.
    pub fn open(&mut self, amount: Decimal, fill_price: Decimal, at: DateTime<Utc>) {
        if self.status != PositionStatus::Pending {
            return;
        }
        self.amount = amount;
        self.entry_price = fill_price;
        self.current_price = fill_price;
        self.unrealized_pnl = Decimal::ZERO;
        self.status = PositionStatus::Open;
        self.opened_at = at;
    }

    /// Re-prices an open position. Closed positions are immutable.
    pub fn mark(&mut self, price: Decimal) {
        if self.status != PositionStatus::Open {
            return;
        }
        self.current_price = price;
        self.unrealized_pnl = (price - self.entry_price) * self.amount;
    }

    /// Closes the position, realising whatever PnL is unrealised at this instant.
    pub fn close(&mut self, at: DateTime<Utc>) {
        if self.status != PositionStatus::Open {
            return;
        }
        self.realized_pnl += self.unrealized_pnl;
        self.unrealized_pnl = Decimal::ZERO;
        self.status = PositionStatus::Closed;
        self.closed_at = Some(at);
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    pub fn stop_loss_hit(&self) -> bool {
        matches!(self.stop_loss, Some(sl) if self.current_price <= sl)
    }

    pub fn take_profit_hit(&self) -> bool {
        matches!(self.take_profit, Some(tp) if self.current_price >= tp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn close_realises_unrealized_pnl() {
        let mut position = Position::pending("u", "p", "momentum", "0xtoken");
        position.open(dec!(2), dec!(100), Utc::now());
        position.mark(dec!(110));
        assert_eq!(position.unrealized_pnl, dec!(20));

        position.close(Utc::now());
        assert_eq!(position.status, PositionStatus::Closed);
        assert_eq!(position.realized_pnl, dec!(20));
        assert!(position.closed_at.is_some());
    }

    #[test]
    fn closed_positions_ignore_further_updates() {
        let mut position = Position::pending("u", "p", "momentum", "0xtoken");
        position.open(dec!(1), dec!(100), Utc::now());
        position.close(Utc::now());
        position.mark(dec!(50));
        assert_eq!(position.current_price, dec!(100));
    }

    #[test]
    fn pending_positions_cannot_close() {
        let mut position = Position::pending("u", "p", "momentum", "0xtoken");
        position.close(Utc::now());
        assert_eq!(position.status, PositionStatus::Pending);
    }
}
