// In crates/execution/src/simulated.rs

use crate::types::{OrderRequest, SimulationSettings};
use crate::{Error, Executor, Result};
use async_trait::async_trait;
use chrono::Utc;
use core_types::{Execution, Side};
use num_traits::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Fills every order immediately at the market price moved against the trader
/// by the configured slippage, charging the taker fee in quote.
#[derive(Debug, Clone)]
pub struct SimulatedExecutor {
    slippage: Decimal,
    fee_rate: Decimal,
}

impl SimulatedExecutor {
    pub fn new(settings: &SimulationSettings) -> Result<Self> {
        let to_decimal = |value: f64, name: &str| {
            Decimal::from_f64(value)
                .filter(|d| *d >= Decimal::ZERO && *d < Decimal::ONE)
                .ok_or_else(|| Error::InvalidOrder(format!("{name} must lie in [0, 1), got {value}")))
        };
        Ok(Self {
            slippage: to_decimal(settings.slippage_percent, "slippage_percent")?,
            fee_rate: to_decimal(settings.taker_fee, "taker_fee")?,
        })
    }
}

#[async_trait]
impl Executor for SimulatedExecutor {
    fn name(&self) -> &'static str {
        "SimulatedExecutor"
    }

    async fn execute(&self, order: &OrderRequest, market_price: Decimal) -> Result<Execution> {
        if order.amount <= Decimal::ZERO {
            return Err(Error::InvalidOrder(format!("amount must be positive, got {}", order.amount)));
        }
        if market_price <= Decimal::ZERO {
            return Err(Error::ExecutionFailed {
                reason: format!("no usable price for {}", order.token),
            });
        }

        // --- Fill price: slippage always works against the trader ---
        let (price, quantity, quote_amount, fee) = match order.side {
            Side::Buy => {
                let price = market_price * (dec!(1) + self.slippage);
                let fee = order.amount * self.fee_rate;
                let quantity = (order.amount - fee) / price;
                (price, quantity, order.amount, fee)
            }
            Side::Sell => {
                let price = market_price * (dec!(1) - self.slippage);
                let gross = order.amount * price;
                let fee = gross * self.fee_rate;
                (price, order.amount, gross - fee, fee)
            }
        };

        let execution = Execution {
            id: core_types::new_id(),
            portfolio_id: order.portfolio_id.clone(),
            token: order.token.clone(),
            side: order.side,
            price,
            quantity,
            quote_amount,
            fee,
            executed_at: Utc::now(),
        };
        tracing::debug!(
            token = %execution.token,
            side = ?execution.side,
            price = %execution.price,
            quantity = %execution.quantity,
            fee = %execution.fee,
            "Simulated fill."
        );
        Ok(execution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> SimulatedExecutor {
        SimulatedExecutor::new(&SimulationSettings {
            taker_fee: 0.001,
            slippage_percent: 0.01,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn buy_spends_exactly_the_quote_amount() {
        let order = OrderRequest::buy("p1", "0xtoken", dec!(1010));
        let fill = executor().execute(&order, dec!(100)).await.unwrap();
        assert_eq!(fill.price, dec!(101));
        assert_eq!(fill.quote_amount, dec!(1010));
        assert_eq!(fill.fee, dec!(1.010));
        assert_eq!(fill.quantity, (dec!(1010) - dec!(1.010)) / dec!(101));
    }

    #[tokio::test]
    async fn sell_receives_proceeds_net_of_fee() {
        let order = OrderRequest::sell("p1", "0xtoken", dec!(10));
        let fill = executor().execute(&order, dec!(100)).await.unwrap();
        assert_eq!(fill.price, dec!(99));
        assert_eq!(fill.quantity, dec!(10));
        assert_eq!(fill.quote_amount, dec!(990) - dec!(0.990));
    }

    #[tokio::test]
    async fn rejects_empty_orders_and_missing_prices() {
        let zero = OrderRequest::buy("p1", "0xtoken", Decimal::ZERO);
        assert!(matches!(executor().execute(&zero, dec!(1)).await, Err(Error::InvalidOrder(_))));

        let order = OrderRequest::buy("p1", "0xtoken", dec!(10));
        assert!(matches!(
            executor().execute(&order, Decimal::ZERO).await,
            Err(Error::ExecutionFailed { .. })
        ));
    }

    #[test]
    fn rejects_nonsensical_settings() {
        let bad = SimulationSettings {
            taker_fee: 1.5,
            slippage_percent: 0.0,
        };
        assert!(SimulatedExecutor::new(&bad).is_err());
    }
}
