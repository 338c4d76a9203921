// In crates/engine/src/lib.rs

pub mod defi;
pub mod error;
pub mod rebalance;
pub mod trading;
pub mod types;

use crate::defi::{DefiAction, DefiActionKind, DefiPosition, ProtocolManager};
use crate::rebalance::{RebalanceAction, RebalanceStrategy, RebalanceStrategyType};
use core_types::{MarketData, Portfolio, Position, RiskProfile, Side};
use database::Store;
use events::{EngineEvent, PortfolioSnapshot};
use execution::Executor;
use futures::future;
use market_data::MarketDataProvider;
use parking_lot::RwLock;
use risk::RiskAssessor;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use strategies::Strategy;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub use error::{Error, Result};
pub use types::{EngineSettings, RejectReason, Rejection, SignalOutcome, TickSummary, TradeReport};

/// Strategy name recorded on positions opened by rebalancing.
pub const REBALANCE_STRATEGY: &str = "rebalance";

/// The result of a rebalance pass that found at least one trigger firing.
#[derive(Debug, Clone)]
pub struct RebalanceOutcome {
    pub triggers: Vec<&'static str>,
    pub planned: Vec<RebalanceAction>,
    pub executed: usize,
}

/// Owns every portfolio and position and runs the trading and rebalance loops.
///
/// Each portfolio sits behind its own async mutex. Everything that reads and
/// then writes a portfolio (limit checks, sizing, execution, bookkeeping)
/// happens under that one lock, so the two loops can run concurrently without
/// breaking `total_value = available_balance + Σ holding.value`.
pub struct TradingEngine {
    settings: EngineSettings,
    assessor: Arc<dyn RiskAssessor>,
    market: Arc<dyn MarketDataProvider>,
    executor: Arc<dyn Executor>,
    strategies: Vec<Arc<dyn Strategy>>,
    /// Tokens offered to strategies every trading tick.
    watchlist: Vec<String>,
    store: Option<Arc<dyn Store>>,
    protocols: Option<Arc<dyn ProtocolManager>>,
    events: broadcast::Sender<EngineEvent>,

    portfolios: RwLock<HashMap<String, Arc<Mutex<Portfolio>>>>,
    positions: RwLock<HashMap<String, Position>>,
    closed_positions: RwLock<HashMap<String, Position>>,
    rebalance_rules: RwLock<HashMap<String, RebalanceStrategy>>,
}

impl TradingEngine {
    pub fn new(
        settings: EngineSettings,
        assessor: Arc<dyn RiskAssessor>,
        market: Arc<dyn MarketDataProvider>,
        executor: Arc<dyn Executor>,
        strategies: Vec<Arc<dyn Strategy>>,
    ) -> Self {
        let (events, _) = events::channel();
        Self {
            settings,
            assessor,
            market,
            executor,
            strategies,
            watchlist: Vec::new(),
            store: None,
            protocols: None,
            events,
            portfolios: RwLock::new(HashMap::new()),
            positions: RwLock::new(HashMap::new()),
            closed_positions: RwLock::new(HashMap::new()),
            rebalance_rules: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_watchlist(mut self, tokens: Vec<String>) -> Self {
        self.watchlist = tokens;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_protocol_manager(mut self, protocols: Arc<dyn ProtocolManager>) -> Self {
        self.protocols = Some(protocols);
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// A receiver for engine notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    // --- Portfolios and positions ---

    /// Registers a portfolio. Every allowed strategy must be one the engine runs.
    pub async fn create_portfolio(
        &self,
        user_id: &str,
        name: &str,
        initial_balance: Decimal,
        risk_profile: RiskProfile,
        allowed_strategies: Vec<String>,
    ) -> Result<Portfolio> {
        if let Some(unknown) = allowed_strategies
            .iter()
            .find(|name| !self.strategies.iter().any(|s| s.name() == name.as_str()))
        {
            return Err(Error::UnknownStrategy(unknown.clone()));
        }

        let portfolio = Portfolio::new(user_id, name, initial_balance, risk_profile, allowed_strategies);
        self.portfolios
            .write()
            .insert(portfolio.id.clone(), Arc::new(Mutex::new(portfolio.clone())));
        tracing::info!(
            portfolio_id = %portfolio.id,
            user_id = %user_id,
            balance = %initial_balance,
            "Portfolio created."
        );

        self.persist_portfolio(&portfolio).await;
        events::publish(&self.events, EngineEvent::PortfolioUpdated(PortfolioSnapshot::from(&portfolio)));
        Ok(portfolio)
    }

    /// A snapshot of the portfolio's current state.
    pub async fn portfolio(&self, portfolio_id: &str) -> Result<Portfolio> {
        let handle = self.portfolio_handle(portfolio_id)?;
        let portfolio = handle.lock().await;
        Ok(portfolio.clone())
    }

    pub fn portfolio_ids(&self) -> Vec<String> {
        self.portfolios.read().keys().cloned().collect()
    }

    /// Looks a position up among open and closed positions.
    pub fn position(&self, position_id: &str) -> Option<Position> {
        let open = self.positions.read().get(position_id).cloned();
        open.or_else(|| self.closed_positions.read().get(position_id).cloned())
    }

    /// Open positions belonging to `portfolio_id`, oldest first.
    pub fn open_positions(&self, portfolio_id: &str) -> Vec<Position> {
        let mut open: Vec<Position> = self
            .positions
            .read()
            .values()
            .filter(|p| p.portfolio_id == portfolio_id)
            .cloned()
            .collect();
        open.sort_by_key(|p| p.opened_at);
        open
    }

    fn portfolio_handle(&self, portfolio_id: &str) -> Result<Arc<Mutex<Portfolio>>> {
        self.portfolios
            .read()
            .get(portfolio_id)
            .cloned()
            .ok_or_else(|| Error::PortfolioNotFound(portfolio_id.to_string()))
    }

    fn strategy(&self, name: &str) -> Result<Arc<dyn Strategy>> {
        self.strategies
            .iter()
            .find(|s| s.name() == name)
            .cloned()
            .ok_or_else(|| Error::UnknownStrategy(name.to_string()))
    }

    // --- Rebalance configuration ---

    /// Creates (or replaces) the portfolio's rebalance strategy.
    pub fn create_rebalance_strategy(
        &self,
        portfolio_id: &str,
        name: &str,
        strategy_type: RebalanceStrategyType,
        target_allocations: HashMap<String, Decimal>,
    ) -> Result<RebalanceStrategy> {
        self.portfolio_handle(portfolio_id)?;
        let strategy = RebalanceStrategy::new(portfolio_id, name, strategy_type, target_allocations)?;
        self.set_rebalance_strategy(strategy.clone())?;
        Ok(strategy)
    }

    /// Installs a fully configured rebalance strategy for its portfolio.
    pub fn set_rebalance_strategy(&self, strategy: RebalanceStrategy) -> Result<()> {
        self.portfolio_handle(&strategy.portfolio_id)?;
        tracing::info!(
            portfolio_id = %strategy.portfolio_id,
            name = %strategy.name,
            kind = %strategy.strategy_type,
            targets = strategy.target_allocations.len(),
            "Rebalance strategy installed."
        );
        self.rebalance_rules
            .write()
            .insert(strategy.portfolio_id.clone(), strategy);
        Ok(())
    }

    pub fn rebalance_strategy(&self, portfolio_id: &str) -> Option<RebalanceStrategy> {
        self.rebalance_rules.read().get(portfolio_id).cloned()
    }

    /// Positions the engine's wallet holds in yield protocols.
    pub async fn yield_positions(&self) -> Result<Vec<DefiPosition>> {
        let protocols = self.protocols.as_ref().ok_or(Error::NoProtocolManager)?;
        protocols
            .get_positions(&self.settings.wallet_address, self.settings.chain_id)
            .await
    }

    // --- Loops ---

    /// Runs the trading and rebalance loops until `shutdown` flips to `true`.
    ///
    /// Each loop finishes the portfolio it is working on before it stops.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        tracing::info!(
            portfolios = self.portfolios.read().len(),
            strategies = self.strategies.len(),
            watchlist = self.watchlist.len(),
            "Starting trading engine."
        );

        let handles = vec![
            tokio::spawn(self.clone().trading_loop(shutdown.clone())),
            tokio::spawn(self.clone().rebalance_loop(shutdown)),
        ];

        for result in future::join_all(handles).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "An engine loop terminated abnormally.");
            }
        }
        tracing::info!("Trading engine stopped.");
    }

    /// Spawns [`TradingEngine::run`] onto the runtime.
    pub fn start(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn trading_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.settings.trading_interval_secs.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            if *shutdown.borrow() {
                break;
            }
            let summary = self.trading_tick(&shutdown).await;
            tracing::info!(
                portfolios = summary.portfolios,
                signals = summary.signals,
                executed = summary.executed,
                rejected = summary.rejected,
                failed = summary.failed,
                closed = summary.closed,
                "Trading tick complete."
            );
        }
        tracing::info!("Trading loop stopped.");
    }

    async fn rebalance_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.settings.rebalance_interval_secs.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            if *shutdown.borrow() {
                break;
            }
            let completed = self.rebalance_tick(&shutdown).await;
            tracing::debug!(completed, "Rebalance tick complete.");
        }
        tracing::info!("Rebalance loop stopped.");
    }

    /// One pass over every portfolio and every strategy it allows.
    ///
    /// A failing pairing is logged and skipped. `shutdown` is checked between
    /// portfolios.
    pub async fn trading_tick(&self, shutdown: &watch::Receiver<bool>) -> TickSummary {
        let mut summary = TickSummary::default();

        let purged = self.assessor.purge_expired();
        if purged > 0 {
            tracing::debug!(purged, "Expired risk assessments purged.");
        }

        let markets = self.market.get_many(&self.watchlist).await;
        for portfolio_id in self.portfolio_ids() {
            if *shutdown.borrow() {
                tracing::info!("Shutdown requested; ending trading tick early.");
                break;
            }
            summary.portfolios += 1;
            self.trade_portfolio(&portfolio_id, &markets, &mut summary).await;
        }
        summary
    }

    async fn trade_portfolio(&self, portfolio_id: &str, markets: &[MarketData], summary: &mut TickSummary) {
        let Ok(handle) = self.portfolio_handle(portfolio_id) else {
            return;
        };
        let allowed: Vec<Arc<dyn Strategy>> = {
            let mut portfolio = handle.lock().await;
            portfolio.roll_day(chrono::Utc::now());
            self.strategies
                .iter()
                .filter(|s| s.is_enabled() && portfolio.allows_strategy(s.name()))
                .cloned()
                .collect()
        };

        match self.mark_to_market(portfolio_id).await {
            Ok(closed) => summary.closed += closed.len(),
            Err(e) => tracing::warn!(portfolio_id = %portfolio_id, error = %e, "Mark-to-market failed."),
        }

        for strategy in &allowed {
            for market in markets {
                let Some(signal) = strategy.analyze(market) else {
                    continue;
                };
                if !signal.is_actionable() {
                    continue;
                }
                summary.signals += 1;
                tracing::debug!(
                    portfolio_id = %portfolio_id,
                    strategy = %strategy.name(),
                    token = %market.symbol,
                    action = %signal.action,
                    "Strategy generated a signal."
                );

                match self.execute_signal(portfolio_id, signal).await {
                    Ok(SignalOutcome::Executed(_)) => summary.executed += 1,
                    Ok(SignalOutcome::Rejected(_)) => summary.rejected += 1,
                    Err(e) => {
                        summary.failed += 1;
                        tracing::warn!(
                            portfolio_id = %portfolio_id,
                            strategy = %strategy.name(),
                            token = %market.symbol,
                            error = %e,
                            "Signal failed; skipping pairing."
                        );
                    }
                }
            }
        }
    }

    /// One pass over every active rebalance strategy. Returns how many rebalanced.
    pub async fn rebalance_tick(&self, shutdown: &watch::Receiver<bool>) -> usize {
        let portfolio_ids: Vec<String> = self
            .rebalance_rules
            .read()
            .values()
            .filter(|r| r.is_active)
            .map(|r| r.portfolio_id.clone())
            .collect();

        let mut completed = 0;
        for portfolio_id in portfolio_ids {
            if *shutdown.borrow() {
                tracing::info!("Shutdown requested; ending rebalance tick early.");
                break;
            }
            match self.rebalance_portfolio(&portfolio_id).await {
                Ok(Some(_)) => completed += 1,
                Ok(None) => {}
                Err(e) => tracing::warn!(portfolio_id = %portfolio_id, error = %e, "Rebalance failed."),
            }
        }
        completed
    }

    // --- Rebalance execution ---

    /// Evaluates the portfolio's triggers and, if any fire, trades toward target.
    ///
    /// Returns `None` when the strategy is inactive or nothing fired. Once a
    /// rebalance starts, `last_rebalance` is updated even if no action ends up
    /// being worth taking.
    pub async fn rebalance_portfolio(&self, portfolio_id: &str) -> Result<Option<RebalanceOutcome>> {
        let rule = self
            .rebalance_strategy(portfolio_id)
            .ok_or_else(|| Error::RebalanceStrategyNotFound(portfolio_id.to_string()))?;
        if !rule.is_active {
            return Ok(None);
        }
        let handle = self.portfolio_handle(portfolio_id)?;
        let quote_token = self.settings.quote_token.as_str();

        let tokens: Vec<String> = rule
            .target_allocations
            .keys()
            .filter(|t| !t.eq_ignore_ascii_case(quote_token))
            .cloned()
            .collect();
        let markets: HashMap<String, MarketData> = self
            .market
            .get_many(&tokens)
            .await
            .into_iter()
            .map(|m| (m.token_address.to_ascii_lowercase(), m))
            .collect();

        let mut portfolio = handle.lock().await;
        for (token, market) in &markets {
            portfolio.mark_token(token, market.price);
        }

        let now = chrono::Utc::now();
        let triggers = rule.fired_triggers(&portfolio, &markets, quote_token, now);
        if triggers.is_empty() {
            return Ok(None);
        }
        tracing::info!(portfolio_id = %portfolio_id, ?triggers, "Rebalance triggered.");

        let planned = rule.plan(&portfolio, quote_token);
        let mut fills = Vec::new();
        for action in &planned {
            let Some(market) = markets.get(&action.token) else {
                tracing::warn!(portfolio_id = %portfolio_id, token = %action.token, "No price for rebalance action; skipping.");
                continue;
            };
            match self.apply_rebalance_action(&mut portfolio, action, market.price).await {
                Ok(Some(fill)) => fills.push(fill),
                Ok(None) => {}
                Err(e) => tracing::warn!(
                    portfolio_id = %portfolio_id,
                    token = %action.token,
                    side = ?action.side,
                    error = %e,
                    "Rebalance action failed; continuing."
                ),
            }
        }
        let snapshot = portfolio.clone();
        drop(portfolio);

        if let Some(current) = self.rebalance_rules.write().get_mut(portfolio_id) {
            if current.id == rule.id {
                current.last_rebalance = Some(now);
            }
        }

        let executed = fills.len();
        for fill in fills {
            self.record_fill(REBALANCE_STRATEGY, fill).await;
        }
        self.persist_portfolio(&snapshot).await;
        events::publish(
            &self.events,
            EngineEvent::RebalanceCompleted {
                portfolio_id: portfolio_id.to_string(),
                actions: executed,
                at: now,
            },
        );
        events::publish(&self.events, EngineEvent::PortfolioUpdated(PortfolioSnapshot::from(&snapshot)));
        tracing::info!(portfolio_id = %portfolio_id, planned = planned.len(), executed, "Rebalance complete.");

        Ok(Some(RebalanceOutcome { triggers, planned, executed }))
    }

    async fn apply_rebalance_action(
        &self,
        portfolio: &mut Portfolio,
        action: &RebalanceAction,
        price: Decimal,
    ) -> Result<Option<trading::Fill>> {
        if price <= Decimal::ZERO {
            return Ok(None);
        }
        match action.side {
            Side::Sell => {
                let held = portfolio
                    .holdings
                    .get(&action.token)
                    .map(|h| h.amount)
                    .unwrap_or_default();
                let quantity = (action.amount / price).min(held);
                if quantity <= Decimal::ZERO {
                    return Ok(None);
                }
                let fill = self.fill_sell(portfolio, &action.token, quantity, price).await?;
                Ok(Some(fill))
            }
            Side::Buy => {
                let quote = action.amount.min(portfolio.available_balance);
                if quote <= Decimal::ZERO {
                    return Ok(None);
                }
                let Some(protocol) = action.protocol.as_deref() else {
                    let fill = self
                        .fill_buy(portfolio, REBALANCE_STRATEGY, &action.token, quote, price, None, None)
                        .await?;
                    return Ok(Some(fill));
                };

                let manager = self.protocols.clone().ok_or(Error::NoProtocolManager)?;
                match manager.get_apy(&action.token, self.settings.chain_id).await {
                    Ok(apy) => tracing::info!(token = %action.token, protocol = %protocol, apy, "Depositing into yield protocol."),
                    Err(e) => tracing::warn!(token = %action.token, protocol = %protocol, error = %e, "APY lookup failed."),
                }
                let fill = self
                    .fill_buy(portfolio, REBALANCE_STRATEGY, &action.token, quote, price, None, None)
                    .await?;
                let deposit = DefiAction {
                    protocol: protocol.to_string(),
                    kind: DefiActionKind::Deposit,
                    token: action.token.clone(),
                    amount: fill.execution.quantity,
                    wallet: self.settings.wallet_address.clone(),
                    chain_id: self.settings.chain_id,
                };
                // The buy has already settled; a failed deposit leaves the tokens in the wallet.
                if let Err(e) = manager.execute_action(&deposit).await {
                    tracing::warn!(token = %action.token, protocol = %protocol, error = %e, "Protocol deposit failed.");
                }
                Ok(Some(fill))
            }
        }
    }

    // --- Persistence and notification ---

    async fn persist_portfolio(&self, portfolio: &Portfolio) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_portfolio(portfolio).await {
                tracing::warn!(portfolio_id = %portfolio.id, error = %e, "Failed to persist portfolio.");
            }
        }
    }

    async fn persist_position(&self, position: &Position) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_position(position).await {
                tracing::warn!(position_id = %position.id, error = %e, "Failed to persist position.");
            }
        }
    }
}
