// In crates/engine/src/trading.rs

//! Signal execution, position lifecycle and mark-to-market.

use crate::types::{RejectReason, Rejection, SignalOutcome, TradeReport};
use crate::{Error, Result, TradingEngine};
use chrono::{DateTime, Utc};
use core_types::{Execution, Portfolio, Position, RiskAssessment, SignalAction, TradingSignal};
use events::{EngineEvent, PortfolioSnapshot, SignalRejection};
use execution::OrderRequest;
use num_traits::FromPrimitive;
use risk::TransactionRiskRequest;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Metadata key the approving assessment is stored under on an executed signal.
pub const RISK_ASSESSMENT_KEY: &str = "risk_assessment";

/// Everything a single executor fill changed.
#[derive(Debug, Clone)]
pub(crate) struct Fill {
    pub execution: Execution,
    pub opened: Option<Position>,
    /// Positions fully retired by a sell.
    pub closed: Vec<Position>,
}

impl TradingEngine {
    /// Runs one signal through the gates and, if it passes them all, trades it.
    ///
    /// Gates run in a fixed order: risk, portfolio limits, sizing, execution.
    /// A gate that refuses the signal yields `SignalOutcome::Rejected` and leaves
    /// the portfolio untouched. Errors are reserved for signals that could not be
    /// evaluated at all.
    pub async fn execute_signal(&self, portfolio_id: &str, mut signal: TradingSignal) -> Result<SignalOutcome> {
        let handle = self.portfolio_handle(portfolio_id)?;
        let strategy = self.strategy(&signal.strategy)?;
        // Holdings and quotes are keyed by lowercase address.
        signal.token_in.make_ascii_lowercase();
        signal.token_out.make_ascii_lowercase();
        if !signal.is_actionable() {
            return Ok(self.reject(portfolio_id, &signal, RejectReason::NotActionable, None));
        }
        strategy.validate_signal(&signal)?;

        // --- 1. Risk gate ---
        let request = self.risk_request(&signal).await;
        let assessment = self.assessor.assess_transaction(&request).await?;
        if let Some(reason) = self.risk_verdict(&assessment) {
            return Ok(self.reject(portfolio_id, &signal, reason, Some(assessment)));
        }
        if let Ok(value) = serde_json::to_value(&assessment) {
            signal.metadata.insert(RISK_ASSESSMENT_KEY.to_string(), value);
        }

        let token = signal.target_token().to_string();
        let price = self.market.get_market_data(&token).await?.price;
        if price <= Decimal::ZERO {
            return Ok(self.reject(portfolio_id, &signal, RejectReason::NoPrice, Some(assessment)));
        }

        let mut portfolio = handle.lock().await;

        // --- 2. Portfolio limits ---
        if let Some(reason) = limit_verdict(&portfolio, &signal, &token) {
            drop(portfolio);
            return Ok(self.reject(portfolio_id, &signal, reason, Some(assessment)));
        }

        // --- 3. Sizing ---
        let size = strategy.calculate_position_size(&signal, &portfolio);
        if size <= Decimal::ZERO {
            drop(portfolio);
            return Ok(self.reject(portfolio_id, &signal, RejectReason::ZeroSize, Some(assessment)));
        }

        // --- 4. Execution ---
        let fill = match signal.action {
            SignalAction::Sell | SignalAction::Unstake => {
                let held = portfolio.holdings.get(&token).map(|h| h.amount).unwrap_or_default();
                let quantity = (size / price).min(held);
                if quantity <= Decimal::ZERO {
                    drop(portfolio);
                    return Ok(self.reject(portfolio_id, &signal, RejectReason::ZeroSize, Some(assessment)));
                }
                self.fill_sell(&mut portfolio, &token, quantity, price).await?
            }
            _ => {
                let profile = &portfolio.risk_profile;
                let stop_loss = signal
                    .stop_loss
                    .or_else(|| fractional_level(price, -profile.stop_loss));
                let take_profit = signal
                    .take_profit
                    .or_else(|| fractional_level(price, profile.take_profit));
                self.fill_buy(&mut portfolio, &signal.strategy, &token, size, price, stop_loss, take_profit)
                    .await?
            }
        };
        let snapshot = portfolio.clone();
        drop(portfolio);

        tracing::info!(
            portfolio_id = %portfolio_id,
            strategy = %signal.strategy,
            signal_id = %signal.id,
            action = %signal.action,
            token = %token,
            size = %size,
            price = %fill.execution.price,
            risk_score = assessment.risk_score,
            "Signal executed."
        );

        let report = TradeReport {
            execution: fill.execution.clone(),
            position_id: fill.opened.as_ref().map(|p| p.id.clone()),
            assessment,
        };
        self.record_fill(&signal.strategy, fill).await;
        self.persist_portfolio(&snapshot).await;
        events::publish(&self.events, EngineEvent::PortfolioUpdated(PortfolioSnapshot::from(&snapshot)));
        Ok(SignalOutcome::Executed(report))
    }

    /// Closes an open position by selling its quantity at the current market.
    ///
    /// `realized_pnl` becomes the position's unrealised PnL at the fill price,
    /// the proceeds return to the portfolio's balance and the position leaves
    /// both the engine's active set and the portfolio's position list.
    pub async fn close_position(&self, position_id: &str, reason: &str) -> Result<Position> {
        let (portfolio_id, token) = self.active_position_route(position_id)?;
        let handle = self.portfolio_handle(&portfolio_id)?;
        let market_price = self.market.get_market_data(&token).await?.price;

        let mut portfolio = handle.lock().await;
        // Another task may have closed it while we waited for the lock.
        self.active_position_route(position_id)?;
        let quantity = self
            .positions
            .read()
            .get(position_id)
            .map(|p| p.amount)
            .unwrap_or_default();
        let held = portfolio.holdings.get(&token).map(|h| h.amount).unwrap_or_default();
        let quantity = quantity.min(held);

        let mut exit_price = market_price;
        let mut execution = None;
        if quantity > Decimal::ZERO {
            let order = OrderRequest::sell(&portfolio_id, &token, quantity);
            let filled = self.executor.execute(&order, market_price).await?;
            portfolio.apply_sell(&token, filled.quantity, filled.price, filled.quote_amount);
            exit_price = filled.price;
            execution = Some(filled);
        }

        let closed = {
            let mut positions = self.positions.write();
            let Some(mut position) = positions.remove(position_id) else {
                return Err(Error::PositionNotFound(position_id.to_string()));
            };
            position.mark(exit_price);
            position.close(Utc::now());
            position
        };
        portfolio.remove_position(position_id);
        portfolio.revalue();
        let snapshot = portfolio.clone();
        drop(portfolio);

        self.closed_positions
            .write()
            .insert(closed.id.clone(), closed.clone());
        tracing::info!(
            portfolio_id = %portfolio_id,
            position_id = %position_id,
            reason = %reason,
            exit_price = %exit_price,
            realized_pnl = %closed.realized_pnl,
            "Position closed."
        );

        if let Some(execution) = execution {
            events::publish(
                &self.events,
                EngineEvent::TradeExecuted {
                    strategy: closed.strategy.clone(),
                    position_id: Some(closed.id.clone()),
                    execution,
                },
            );
        }
        events::publish(
            &self.events,
            EngineEvent::PositionClosed {
                portfolio_id: portfolio_id.clone(),
                position_id: closed.id.clone(),
                reason: reason.to_string(),
                realized_pnl: closed.realized_pnl,
            },
        );
        self.persist_position(&closed).await;
        self.persist_portfolio(&snapshot).await;
        events::publish(&self.events, EngineEvent::PortfolioUpdated(PortfolioSnapshot::from(&snapshot)));
        Ok(closed)
    }

    /// Re-prices the portfolio's holdings and open positions, then closes any
    /// position whose stop-loss or take-profit has been crossed.
    pub async fn mark_to_market(&self, portfolio_id: &str) -> Result<Vec<Position>> {
        let handle = self.portfolio_handle(portfolio_id)?;
        let tokens: Vec<String> = {
            let portfolio = handle.lock().await;
            portfolio.holdings.keys().cloned().collect()
        };
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let prices: HashMap<String, Decimal> = self
            .market
            .get_many(&tokens)
            .await
            .into_iter()
            .map(|m| (m.token_address.to_ascii_lowercase(), m.price))
            .collect();

        let triggered: Vec<(String, &'static str)> = {
            let mut portfolio = handle.lock().await;
            for (token, price) in &prices {
                portfolio.mark_token(token, *price);
            }
            let mut positions = self.positions.write();
            positions
                .values_mut()
                .filter(|p| p.portfolio_id == portfolio_id)
                .filter_map(|position| {
                    let price = *prices.get(&position.token)?;
                    position.mark(price);
                    if position.stop_loss_hit() {
                        Some((position.id.clone(), "stop_loss"))
                    } else if position.take_profit_hit() {
                        Some((position.id.clone(), "take_profit"))
                    } else {
                        None
                    }
                })
                .collect()
        };

        let mut closed = Vec::with_capacity(triggered.len());
        for (position_id, reason) in triggered {
            match self.close_position(&position_id, reason).await {
                Ok(position) => closed.push(position),
                Err(e) => tracing::warn!(position_id = %position_id, reason, error = %e, "Failed to close triggered position."),
            }
        }
        Ok(closed)
    }

    // --- Gates ---

    /// Shapes the signal as the on-chain transaction it would become.
    async fn risk_request(&self, signal: &TradingSignal) -> TransactionRiskRequest {
        let value = match &self.settings.native_token {
            Some(native) => match self.market.get_market_data(native).await {
                Ok(m) if m.price > Decimal::ZERO => (signal.amount_in / m.price).round_dp(18),
                Ok(_) => Decimal::ZERO,
                Err(e) => {
                    tracing::warn!(token = %native, error = %e, "Native price unavailable; assessing with zero value.");
                    Decimal::ZERO
                }
            },
            None => Decimal::ZERO,
        };

        TransactionRiskRequest {
            from: self.settings.wallet_address.clone(),
            to: signal.target_token().to_string(),
            value,
            data: None,
            chain_id: self.settings.chain_id,
            gas_limit: self.settings.gas_limit,
            gas_price: Decimal::from_f64(self.settings.gas_price_gwei).unwrap_or_default(),
            transaction_hash: None,
            include_ml: self.settings.include_ml,
        }
    }

    fn risk_verdict(&self, assessment: &RiskAssessment) -> Option<RejectReason> {
        if assessment.risk_score > self.settings.max_risk_score {
            Some(RejectReason::RiskScore {
                score: assessment.risk_score,
                max: self.settings.max_risk_score,
            })
        } else if self.settings.rejected_grades.contains(&assessment.safety_grade) {
            Some(RejectReason::RiskGrade(assessment.safety_grade))
        } else {
            None
        }
    }

    fn reject(
        &self,
        portfolio_id: &str,
        signal: &TradingSignal,
        reason: RejectReason,
        assessment: Option<RiskAssessment>,
    ) -> SignalOutcome {
        tracing::info!(
            portfolio_id = %portfolio_id,
            strategy = %signal.strategy,
            signal_id = %signal.id,
            reason = %reason,
            "Signal rejected."
        );
        events::publish(
            &self.events,
            EngineEvent::SignalRejected(SignalRejection {
                portfolio_id: portfolio_id.to_string(),
                strategy: signal.strategy.clone(),
                signal_id: signal.id.clone(),
                reason: reason.to_string(),
                risk_score: assessment.as_ref().map(|a| a.risk_score),
                safety_grade: assessment.as_ref().map(|a| a.safety_grade),
            }),
        );
        SignalOutcome::Rejected(Rejection {
            signal_id: signal.id.clone(),
            strategy: signal.strategy.clone(),
            reason,
            assessment,
        })
    }

    // --- Fills ---

    /// Spends `quote` on `token` and opens a position for the bought quantity.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn fill_buy(
        &self,
        portfolio: &mut Portfolio,
        strategy: &str,
        token: &str,
        quote: Decimal,
        price: Decimal,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
    ) -> Result<Fill> {
        let order = OrderRequest::buy(&portfolio.id, token, quote);
        let execution = self.executor.execute(&order, price).await?;
        portfolio.apply_buy(token, execution.quantity, execution.price, execution.quote_amount);

        let mut position = Position::pending(&portfolio.user_id, &portfolio.id, strategy, token);
        position.stop_loss = stop_loss;
        position.take_profit = take_profit;
        position.open(execution.quantity, execution.price, execution.executed_at);
        portfolio.add_position(&position.id);
        self.positions
            .write()
            .insert(position.id.clone(), position.clone());

        Ok(Fill {
            execution,
            opened: Some(position),
            closed: Vec::new(),
        })
    }

    /// Sells `quantity` of `token` and retires the portfolio's positions in it,
    /// oldest first. Sells never open positions.
    pub(crate) async fn fill_sell(
        &self,
        portfolio: &mut Portfolio,
        token: &str,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<Fill> {
        let order = OrderRequest::sell(&portfolio.id, token, quantity);
        let execution = self.executor.execute(&order, price).await?;
        let (sold, realized) = portfolio.apply_sell(token, execution.quantity, execution.price, execution.quote_amount);
        tracing::debug!(token = %token, sold = %sold, realized = %realized, "Holding reduced.");

        let closed = self.retire_positions(portfolio, token, sold, execution.price, execution.executed_at);
        Ok(Fill {
            execution,
            opened: None,
            closed,
        })
    }

    fn retire_positions(
        &self,
        portfolio: &mut Portfolio,
        token: &str,
        mut remaining: Decimal,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> Vec<Position> {
        let mut positions = self.positions.write();
        let mut queue: Vec<(DateTime<Utc>, String)> = positions
            .values()
            .filter(|p| p.portfolio_id == portfolio.id && p.token == token && p.is_open())
            .map(|p| (p.opened_at, p.id.clone()))
            .collect();
        queue.sort();

        let mut closed = Vec::new();
        for (_, id) in queue {
            if remaining <= Decimal::ZERO {
                break;
            }
            let Some(position) = positions.get_mut(&id) else {
                continue;
            };
            position.mark(price);
            if position.amount > remaining {
                // Partial reduce: realise the sold slice, keep the rest open.
                position.realized_pnl += (price - position.entry_price) * remaining;
                position.amount -= remaining;
                position.mark(price);
                remaining = Decimal::ZERO;
                continue;
            }
            remaining -= position.amount;
            position.close(at);
            if let Some(done) = positions.remove(&id) {
                portfolio.remove_position(&id);
                closed.push(done);
            }
        }
        drop(positions);

        if !closed.is_empty() {
            let mut history = self.closed_positions.write();
            for position in &closed {
                history.insert(position.id.clone(), position.clone());
            }
        }
        closed
    }

    /// Publishes and persists what a fill changed.
    pub(crate) async fn record_fill(&self, strategy: &str, fill: Fill) {
        for position in &fill.closed {
            events::publish(
                &self.events,
                EngineEvent::PositionClosed {
                    portfolio_id: position.portfolio_id.clone(),
                    position_id: position.id.clone(),
                    reason: "sold".to_string(),
                    realized_pnl: position.realized_pnl,
                },
            );
            self.persist_position(position).await;
        }
        if let Some(position) = &fill.opened {
            self.persist_position(position).await;
        }
        events::publish(
            &self.events,
            EngineEvent::TradeExecuted {
                strategy: strategy.to_string(),
                position_id: fill.opened.map(|p| p.id),
                execution: fill.execution,
            },
        );
    }

    /// `(portfolio_id, token)` of an open position.
    fn active_position_route(&self, position_id: &str) -> Result<(String, String)> {
        if let Some(p) = self.positions.read().get(position_id) {
            return Ok((p.portfolio_id.clone(), p.token.clone()));
        }
        if self.closed_positions.read().contains_key(position_id) {
            return Err(Error::PositionAlreadyClosed(position_id.to_string()));
        }
        Err(Error::PositionNotFound(position_id.to_string()))
    }
}

/// The portfolio-limit gate. Balance applies to buys; sells need a holding.
fn limit_verdict(portfolio: &Portfolio, signal: &TradingSignal, token: &str) -> Option<RejectReason> {
    let profile = &portfolio.risk_profile;
    if portfolio.daily_pnl < -(profile.max_daily_loss * portfolio.total_value) {
        return Some(RejectReason::DailyLossLimit);
    }
    if signal.amount_in > profile.max_position_size * portfolio.total_value {
        return Some(RejectReason::PositionLimit);
    }
    match signal.action {
        SignalAction::Sell | SignalAction::Unstake => {
            let held = portfolio.holdings.get(token).is_some_and(|h| h.amount > Decimal::ZERO);
            (!held).then_some(RejectReason::NoHolding)
        }
        _ => (signal.amount_in > portfolio.available_balance).then_some(RejectReason::InsufficientBalance),
    }
}

/// `price × (1 + fraction)`, or `None` when the fraction is zero.
fn fractional_level(price: Decimal, fraction: Decimal) -> Option<Decimal> {
    (!fraction.is_zero()).then(|| price * (Decimal::ONE + fraction))
}
