// In crates/engine/tests/trading_engine.rs

use async_trait::async_trait;
use chrono::Utc;
use core_types::{
    MarketData, PositionStatus, RiskAssessment, RiskLevel, RiskProfile, SafetyGrade, SignalAction, TradingSignal,
    Urgency,
};
use database::MemoryStore;
use engine::defi::{DefiAction, DefiActionKind, DefiActionResult, DefiPosition, ProtocolManager};
use engine::rebalance::{RebalanceStrategy, RebalanceStrategyType};
use engine::{EngineSettings, Error, RejectReason, SignalOutcome, TradingEngine};
use events::EngineEvent;
use execution::{SimulatedExecutor, SimulationSettings};
use market_data::InMemoryMarketData;
use risk::{ContractRiskRequest, RiskAssessor, RiskEngine, RiskSettings, TransactionRiskRequest};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use strategies::Strategy;
use strategies::types::StrategySettings;
use tokio::sync::{broadcast, watch};

const WETH: &str = "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2";
const LINK: &str = "0x514910771af9ca656af840dff83e8264ecf986ca";

// --- Test doubles ---

/// Returns a canned verdict for every request.
struct FixedAssessor {
    verdict: Mutex<(f64, SafetyGrade)>,
    fail: bool,
    calls: AtomicUsize,
}

impl FixedAssessor {
    fn new(score: f64, grade: SafetyGrade) -> Self {
        Self {
            verdict: Mutex::new((score, grade)),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(0.0, SafetyGrade::A)
        }
    }

    fn assessment(&self) -> RiskAssessment {
        let (risk_score, safety_grade) = *self.verdict.lock().unwrap();
        let now = Utc::now();
        RiskAssessment {
            id: core_types::new_id(),
            transaction_hash: None,
            contract_address: None,
            chain_id: 1,
            risk_score,
            safety_grade,
            confidence: 0.7,
            factors: Vec::new(),
            recommendations: Vec::new(),
            warnings: Vec::new(),
            ml_predictions: None,
            assessed_at: now,
            expires_at: now + chrono::Duration::minutes(5),
        }
    }
}

#[async_trait]
impl RiskAssessor for FixedAssessor {
    async fn assess_transaction(&self, _request: &TransactionRiskRequest) -> risk::Result<RiskAssessment> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(risk::Error::InvalidRequest("assessor offline".to_string()));
        }
        Ok(self.assessment())
    }

    async fn assess_contract(&self, _request: &ContractRiskRequest) -> risk::Result<RiskAssessment> {
        Ok(self.assessment())
    }
}

/// Emits the same trade for every market it sees and counts how often it is asked.
struct Scripted {
    name: &'static str,
    enabled: bool,
    action: SignalAction,
    amount: Decimal,
    confidence: f64,
    calls: AtomicUsize,
}

impl Scripted {
    fn buyer(name: &'static str, amount: Decimal, confidence: f64) -> Arc<Self> {
        Arc::new(Self {
            name,
            enabled: true,
            action: SignalAction::Buy,
            amount,
            confidence,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Strategy for Scripted {
    fn name(&self) -> &'static str {
        self.name
    }

    fn description(&self) -> &'static str {
        "scripted test strategy"
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Moderate
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({ "amount": self.amount.to_string() })
    }

    fn analyze(&self, market: &MarketData) -> Option<TradingSignal> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Some(signal(self.name, self.action, &market.token_address, self.amount, self.confidence))
    }
}

fn signal(strategy: &str, action: SignalAction, token: &str, amount: Decimal, confidence: f64) -> TradingSignal {
    let quote = EngineSettings::default().quote_token;
    let (token_in, token_out) = match action {
        SignalAction::Sell => (token.to_string(), quote),
        _ => (quote, token.to_string()),
    };
    TradingSignal {
        id: core_types::new_id(),
        strategy: strategy.to_string(),
        action,
        token_in,
        token_out,
        amount_in: amount,
        expected_out: Decimal::ZERO,
        confidence,
        urgency: Urgency::Medium,
        valid_until: Utc::now() + chrono::Duration::minutes(5),
        stop_loss: None,
        take_profit: None,
        metadata: HashMap::new(),
    }
}

#[derive(Default)]
struct RecordingProtocols {
    actions: Mutex<Vec<DefiAction>>,
}

#[async_trait]
impl ProtocolManager for RecordingProtocols {
    async fn execute_action(&self, action: &DefiAction) -> engine::Result<DefiActionResult> {
        self.actions.lock().unwrap().push(action.clone());
        Ok(DefiActionResult {
            transaction_hash: Some("0xfeed".to_string()),
            amount: action.amount,
        })
    }

    async fn get_positions(&self, _wallet: &str, _chain_id: u64) -> engine::Result<Vec<DefiPosition>> {
        Ok(self
            .actions
            .lock()
            .unwrap()
            .iter()
            .map(|a| DefiPosition {
                protocol: a.protocol.clone(),
                token: a.token.clone(),
                amount: a.amount,
                apy: 0.04,
            })
            .collect())
    }

    async fn get_apy(&self, _token: &str, _chain_id: u64) -> engine::Result<f64> {
        Ok(0.04)
    }
}

// --- Harness ---

macro_rules! scripted {
    ($($s:expr),* $(,)?) => {
        vec![$({ let s: Arc<dyn Strategy> = $s.clone(); s }),*]
    };
}

struct Harness {
    engine: Arc<TradingEngine>,
    market: Arc<InMemoryMarketData>,
    store: Arc<MemoryStore>,
}

fn harness_with(assessor: Arc<dyn RiskAssessor>, strategies: Vec<Arc<dyn Strategy>>) -> Harness {
    let market = Arc::new(InMemoryMarketData::new());
    market.set(MarketData::new(WETH, "WETH", dec!(2000)));
    market.set(MarketData::new(LINK, "LINK", dec!(10)));

    let executor = SimulatedExecutor::new(&SimulationSettings {
        taker_fee: 0.0,
        slippage_percent: 0.0,
    })
    .unwrap();
    let store = Arc::new(MemoryStore::new());

    let engine = TradingEngine::new(
        EngineSettings::default(),
        assessor,
        market.clone(),
        Arc::new(executor),
        strategies,
    )
    .with_watchlist(vec![WETH.to_string()])
    .with_store(store.clone());

    Harness {
        engine: Arc::new(engine),
        market,
        store,
    }
}

fn harness(assessor: Arc<FixedAssessor>, strategies: Vec<Arc<dyn Strategy>>) -> Harness {
    harness_with(assessor, strategies)
}

async fn moderate_portfolio(engine: &TradingEngine, allowed: &[&str]) -> String {
    engine
        .create_portfolio(
            "user-1",
            "main",
            dec!(10_000),
            RiskProfile::for_level(RiskLevel::Moderate),
            allowed.iter().map(|s| s.to_string()).collect(),
        )
        .await
        .unwrap()
        .id
}

fn drain(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        seen.push(event);
    }
    seen
}

fn tolerance() -> Decimal {
    dec!(0.0000001)
}

// --- Risk gate ---

#[tokio::test]
async fn risky_signals_never_touch_the_portfolio() {
    let assessor = Arc::new(FixedAssessor::new(75.0, SafetyGrade::D));
    let alpha = Scripted::buyer("alpha", dec!(500), 1.0);
    let h = harness(assessor.clone(), scripted![alpha]);
    let pid = moderate_portfolio(&h.engine, &["alpha"]).await;
    let before = h.engine.portfolio(&pid).await.unwrap();
    let mut rx = h.engine.subscribe();

    let outcome = h
        .engine
        .execute_signal(&pid, signal("alpha", SignalAction::Buy, WETH, dec!(500), 1.0))
        .await
        .unwrap();
    match outcome {
        SignalOutcome::Rejected(rejection) => {
            assert!(matches!(rejection.reason, RejectReason::RiskScore { .. }));
            assert!(rejection.assessment.is_some());
        }
        other => panic!("expected a rejection, got {other:?}"),
    }

    // Grade alone is enough to reject.
    *assessor.verdict.lock().unwrap() = (45.0, SafetyGrade::F);
    let outcome = h
        .engine
        .execute_signal(&pid, signal("alpha", SignalAction::Buy, WETH, dec!(500), 1.0))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        SignalOutcome::Rejected(ref r) if r.reason == RejectReason::RiskGrade(SafetyGrade::F)
    ));

    let after = h.engine.portfolio(&pid).await.unwrap();
    assert_eq!(after.available_balance, before.available_balance);
    assert_eq!(after.total_value, before.total_value);
    assert!(after.holdings.is_empty());
    assert!(after.active_positions.is_empty());
    assert!(h.engine.open_positions(&pid).is_empty());
    assert_eq!(h.store.position_count(), 0);

    let rejections = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, EngineEvent::SignalRejected(_)))
        .count();
    assert_eq!(rejections, 2);
}

// --- Sizing and bookkeeping ---

#[tokio::test]
async fn accepted_signals_are_sized_within_limits() {
    let assessor = Arc::new(FixedAssessor::new(10.0, SafetyGrade::A));
    let alpha = Scripted::buyer("alpha", dec!(800), 0.5);
    let h = harness(assessor.clone(), scripted![alpha]);
    let pid = moderate_portfolio(&h.engine, &["alpha"]).await;

    let outcome = h
        .engine
        .execute_signal(&pid, signal("alpha", SignalAction::Buy, WETH, dec!(800), 0.5))
        .await
        .unwrap();
    let SignalOutcome::Executed(report) = outcome else {
        panic!("signal should have executed");
    };

    // Allowance 1,000 × confidence 0.5 × moderate multiplier 0.75.
    assert_eq!(report.execution.quote_amount, dec!(375));
    assert!(report.execution.quote_amount <= dec!(1000).min(dec!(10_000)));
    assert_eq!(assessor.calls.load(Ordering::SeqCst), 1);

    let position_id = report.position_id.expect("buys open a position");
    let position = h.engine.position(&position_id).unwrap();
    assert_eq!(position.status, PositionStatus::Open);
    assert_eq!(position.amount, dec!(0.1875));
    assert_eq!(position.entry_price, dec!(2000));
    assert_eq!(position.stop_loss, Some(dec!(1800)));
    assert_eq!(position.take_profit, Some(dec!(2400)));

    let portfolio = h.engine.portfolio(&pid).await.unwrap();
    assert_eq!(portfolio.available_balance, dec!(9625));
    assert_eq!(portfolio.invested_amount, dec!(375));
    assert!(portfolio.active_positions.contains(&position_id));
    assert!(portfolio.invariant_holds(tolerance()));

    assert!(h.store.position(&position_id).is_some());
    assert_eq!(h.store.portfolio(&pid).unwrap().available_balance, dec!(9625));
}

#[tokio::test]
async fn oversized_and_unfunded_signals_are_rejected() {
    let assessor = Arc::new(FixedAssessor::new(10.0, SafetyGrade::A));
    let h = harness(assessor, scripted![Scripted::buyer("alpha", dec!(100), 1.0)]);
    let pid = moderate_portfolio(&h.engine, &["alpha"]).await;

    let outcome = h
        .engine
        .execute_signal(&pid, signal("alpha", SignalAction::Buy, WETH, dec!(1_500), 1.0))
        .await
        .unwrap();
    assert!(matches!(outcome, SignalOutcome::Rejected(ref r) if r.reason == RejectReason::PositionLimit));

    let outcome = h
        .engine
        .execute_signal(&pid, signal("alpha", SignalAction::Sell, WETH, dec!(100), 1.0))
        .await
        .unwrap();
    assert!(matches!(outcome, SignalOutcome::Rejected(ref r) if r.reason == RejectReason::NoHolding));

    let unknown = h
        .engine
        .execute_signal(&pid, signal("omega", SignalAction::Buy, WETH, dec!(100), 1.0))
        .await;
    assert!(matches!(unknown, Err(Error::UnknownStrategy(_))));

    let missing = h
        .engine
        .execute_signal("nope", signal("alpha", SignalAction::Buy, WETH, dec!(100), 1.0))
        .await;
    assert!(matches!(missing, Err(Error::PortfolioNotFound(_))));
}

#[tokio::test]
async fn sells_retire_positions_oldest_first() {
    let assessor = Arc::new(FixedAssessor::new(10.0, SafetyGrade::A));
    let h = harness(assessor, scripted![Scripted::buyer("alpha", dec!(100), 1.0)]);
    let pid = moderate_portfolio(&h.engine, &["alpha"]).await;

    let mut opened = Vec::new();
    for _ in 0..2 {
        let outcome = h
            .engine
            .execute_signal(&pid, signal("alpha", SignalAction::Buy, WETH, dec!(800), 0.5))
            .await
            .unwrap();
        let SignalOutcome::Executed(report) = outcome else {
            panic!("buy should execute");
        };
        opened.push(report.position_id.unwrap());
        std::thread::sleep(Duration::from_millis(2));
    }

    h.market.set_price(WETH, dec!(2400));
    let outcome = h
        .engine
        .execute_signal(&pid, signal("alpha", SignalAction::Sell, WETH, dec!(600), 1.0))
        .await
        .unwrap();
    let SignalOutcome::Executed(report) = outcome else {
        panic!("sell should execute");
    };
    assert!(report.position_id.is_none());
    assert_eq!(report.execution.quantity, dec!(0.25));

    let first = h.engine.position(&opened[0]).unwrap();
    assert_eq!(first.status, PositionStatus::Closed);
    assert_eq!(first.realized_pnl, dec!(75));

    let remaining = h.engine.open_positions(&pid);
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, opened[1]);
    assert_eq!(remaining[0].amount, dec!(0.125));

    let portfolio = h.engine.portfolio(&pid).await.unwrap();
    assert_eq!(portfolio.active_positions, vec![opened[1].clone()]);
    assert!(portfolio.invariant_holds(tolerance()));
}

#[tokio::test]
async fn checksummed_addresses_trade_like_lowercase_ones() {
    const CHECKSUMMED_WETH: &str = "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2";
    let assessor = Arc::new(FixedAssessor::new(10.0, SafetyGrade::A));
    let h = harness(assessor, scripted![Scripted::buyer("alpha", dec!(100), 1.0)]);
    let pid = moderate_portfolio(&h.engine, &["alpha"]).await;

    let bought = h
        .engine
        .execute_signal(&pid, signal("alpha", SignalAction::Buy, CHECKSUMMED_WETH, dec!(400), 1.0))
        .await
        .unwrap();
    assert!(bought.is_executed());
    let portfolio = h.engine.portfolio(&pid).await.unwrap();
    assert!(portfolio.holdings.contains_key(WETH));

    let sold = h
        .engine
        .execute_signal(&pid, signal("alpha", SignalAction::Sell, CHECKSUMMED_WETH, dec!(100), 1.0))
        .await
        .unwrap();
    let SignalOutcome::Executed(report) = sold else {
        panic!("sell of a checksummed address should execute");
    };
    assert_eq!(report.execution.quantity, dec!(0.05));
    let portfolio = h.engine.portfolio(&pid).await.unwrap();
    assert!(portfolio.invariant_holds(tolerance()));
}

#[tokio::test]
async fn a_zero_price_rejects_instead_of_dividing() {
    let assessor = Arc::new(FixedAssessor::new(10.0, SafetyGrade::A));
    let h = harness(assessor, scripted![Scripted::buyer("alpha", dec!(100), 1.0)]);
    let pid = moderate_portfolio(&h.engine, &["alpha"]).await;
    let bought = h
        .engine
        .execute_signal(&pid, signal("alpha", SignalAction::Buy, WETH, dec!(400), 1.0))
        .await
        .unwrap();
    assert!(bought.is_executed());
    let before = h.engine.portfolio(&pid).await.unwrap();

    h.market.set_price(WETH, dec!(0));
    let mut rx = h.engine.subscribe();
    for action in [SignalAction::Sell, SignalAction::Buy] {
        let outcome = h
            .engine
            .execute_signal(&pid, signal("alpha", action, WETH, dec!(100), 1.0))
            .await
            .unwrap();
        assert!(matches!(outcome, SignalOutcome::Rejected(ref r) if r.reason == RejectReason::NoPrice));
    }
    let rejected = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, EngineEvent::SignalRejected(_)))
        .count();
    assert_eq!(rejected, 2);

    let after = h.engine.portfolio(&pid).await.unwrap();
    assert_eq!(after.available_balance, before.available_balance);
    assert_eq!(after.active_positions, before.active_positions);
    assert_eq!(h.engine.open_positions(&pid).len(), 1);
}

// --- Position lifecycle ---

#[tokio::test]
async fn closing_a_position_realises_pnl_and_credits_balance() {
    let assessor = Arc::new(FixedAssessor::new(10.0, SafetyGrade::A));
    let h = harness(assessor, scripted![Scripted::buyer("alpha", dec!(100), 1.0)]);
    let pid = moderate_portfolio(&h.engine, &["alpha"]).await;

    let SignalOutcome::Executed(report) = h
        .engine
        .execute_signal(&pid, signal("alpha", SignalAction::Buy, WETH, dec!(800), 0.5))
        .await
        .unwrap()
    else {
        panic!("buy should execute");
    };
    let position_id = report.position_id.unwrap();

    h.market.set_price(WETH, dec!(2200));
    let closed = h.engine.close_position(&position_id, "manual").await.unwrap();
    assert_eq!(closed.status, PositionStatus::Closed);
    assert_eq!(closed.realized_pnl, dec!(37.5));
    assert!(closed.closed_at.is_some());

    let portfolio = h.engine.portfolio(&pid).await.unwrap();
    assert_eq!(portfolio.available_balance, dec!(10_037.5));
    assert!(portfolio.holdings.is_empty());
    assert!(portfolio.active_positions.is_empty());
    assert!(portfolio.invariant_holds(tolerance()));
    assert_eq!(h.store.position(&position_id).unwrap().status, PositionStatus::Closed);

    assert!(matches!(
        h.engine.close_position(&position_id, "again").await,
        Err(Error::PositionAlreadyClosed(_))
    ));
    assert!(matches!(
        h.engine.close_position("missing", "manual").await,
        Err(Error::PositionNotFound(_))
    ));
}

#[tokio::test]
async fn stop_loss_closes_on_mark_to_market() {
    let assessor = Arc::new(FixedAssessor::new(10.0, SafetyGrade::A));
    let h = harness(assessor, scripted![Scripted::buyer("alpha", dec!(100), 1.0)]);
    let pid = moderate_portfolio(&h.engine, &["alpha"]).await;
    h.engine
        .execute_signal(&pid, signal("alpha", SignalAction::Buy, WETH, dec!(800), 0.5))
        .await
        .unwrap();
    let mut rx = h.engine.subscribe();

    h.market.set_price(WETH, dec!(1700));
    let closed = h.engine.mark_to_market(&pid).await.unwrap();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].realized_pnl, dec!(-56.25));

    let stop_events = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, EngineEvent::PositionClosed { reason, .. } if reason == "stop_loss"))
        .count();
    assert_eq!(stop_events, 1);
    assert!(h.engine.portfolio(&pid).await.unwrap().invariant_holds(tolerance()));
}

// --- Trading loop ---

#[tokio::test]
async fn strategies_outside_the_allow_list_are_never_invoked() {
    let assessor = Arc::new(FixedAssessor::new(10.0, SafetyGrade::A));
    let alpha = Scripted::buyer("alpha", dec!(100), 1.0);
    let beta = Scripted::buyer("beta", dec!(100), 1.0);
    let gamma = Arc::new(Scripted {
        name: "gamma",
        enabled: false,
        action: SignalAction::Buy,
        amount: dec!(100),
        confidence: 1.0,
        calls: AtomicUsize::new(0),
    });
    let h = harness(assessor, scripted![alpha, beta, gamma]);
    moderate_portfolio(&h.engine, &["alpha", "gamma"]).await;

    let (_tx, rx) = watch::channel(false);
    let summary = h.engine.trading_tick(&rx).await;

    assert_eq!(summary.portfolios, 1);
    assert_eq!(alpha.calls(), 1);
    assert_eq!(beta.calls(), 0);
    assert_eq!(gamma.calls(), 0);
    assert_eq!(summary.executed, 1);

    let unknown = h
        .engine
        .create_portfolio(
            "user-2",
            "side",
            dec!(1_000),
            RiskProfile::for_level(RiskLevel::Conservative),
            vec!["delta".to_string()],
        )
        .await;
    assert!(matches!(unknown, Err(Error::UnknownStrategy(name)) if name == "delta"));
}

#[tokio::test]
async fn a_failing_pairing_does_not_stop_the_tick() {
    let h = harness(
        Arc::new(FixedAssessor::failing()),
        scripted![Scripted::buyer("alpha", dec!(100), 1.0)],
    );
    moderate_portfolio(&h.engine, &["alpha"]).await;
    moderate_portfolio(&h.engine, &["alpha"]).await;

    let (_tx, rx) = watch::channel(false);
    let summary = h.engine.trading_tick(&rx).await;
    assert_eq!(summary.portfolios, 2);
    assert_eq!(summary.signals, 2);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.executed, 0);
}

#[tokio::test]
async fn momentum_trades_through_the_real_risk_engine() {
    let assessor: Arc<dyn RiskAssessor> = Arc::new(RiskEngine::new(RiskSettings::default()).without_models());
    let strategies = strategies::create_strategies(&StrategySettings::default()).unwrap();
    let h = harness_with(assessor, strategies);

    let mut weth = MarketData::new(WETH, "WETH", dec!(2000));
    weth.price_change_24h = 6.0;
    weth.technical_indicators.rsi = 25.0;
    weth.technical_indicators.volume = 1_000.0;
    weth.volume_24h = dec!(2_000);
    h.market.set(weth);

    let pid = h
        .engine
        .create_portfolio(
            "user-1",
            "growth",
            dec!(20_000),
            RiskProfile::for_level(RiskLevel::Aggressive),
            vec!["momentum".to_string()],
        )
        .await
        .unwrap()
        .id;

    let (_tx, rx) = watch::channel(false);
    let summary = h.engine.trading_tick(&rx).await;
    assert_eq!(summary.executed, 1, "{summary:?}");

    let positions = h.engine.open_positions(&pid);
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].strategy, "momentum");
    assert_eq!(positions[0].token, WETH);
    assert_eq!(positions[0].stop_loss, Some(dec!(1900)));

    let portfolio = h.engine.portfolio(&pid).await.unwrap();
    assert_eq!(portfolio.available_balance, dec!(19_000));
    assert!(portfolio.invariant_holds(tolerance()));
}

// --- Shutdown ---

#[tokio::test]
async fn shutdown_stops_ticks_and_loops() {
    let h = harness(
        Arc::new(FixedAssessor::new(10.0, SafetyGrade::A)),
        scripted![Scripted::buyer("alpha", dec!(100), 1.0)],
    );
    moderate_portfolio(&h.engine, &["alpha"]).await;

    let (tx, rx) = watch::channel(true);
    let summary = h.engine.trading_tick(&rx).await;
    assert_eq!(summary.portfolios, 0);
    assert_eq!(h.engine.rebalance_tick(&rx).await, 0);
    drop(tx);

    let (tx, rx) = watch::channel(false);
    let handle = h.engine.clone().start(rx);
    tokio::time::sleep(Duration::from_millis(50)).await;
    tx.send(true).unwrap();
    let stopped = tokio::time::timeout(Duration::from_secs(5), handle).await;
    assert!(matches!(stopped, Ok(Ok(()))));
}

// --- Rebalancing ---

fn targets(pairs: &[(&str, Decimal)]) -> HashMap<String, Decimal> {
    pairs.iter().map(|(t, f)| (t.to_string(), *f)).collect()
}

#[tokio::test]
async fn rebalance_allocations_must_sum_to_one() {
    let h = harness(Arc::new(FixedAssessor::new(10.0, SafetyGrade::A)), Vec::new());
    let pid = moderate_portfolio(&h.engine, &[]).await;

    let ok = h.engine.create_rebalance_strategy(
        &pid,
        "even",
        RebalanceStrategyType::Fixed,
        targets(&[(WETH, dec!(0.5)), (LINK, dec!(0.5))]),
    );
    assert!(ok.is_ok());

    let short = h.engine.create_rebalance_strategy(
        &pid,
        "short",
        RebalanceStrategyType::Fixed,
        targets(&[(WETH, dec!(0.5)), (LINK, dec!(0.4))]),
    );
    assert!(matches!(short, Err(Error::InvalidAllocation { .. })));
    assert_eq!(h.engine.rebalance_strategy(&pid).unwrap().name, "even");

    let orphan = h.engine.create_rebalance_strategy(
        "nope",
        "even",
        RebalanceStrategyType::Fixed,
        targets(&[(WETH, dec!(1))]),
    );
    assert!(matches!(orphan, Err(Error::PortfolioNotFound(_))));
}

#[tokio::test]
async fn rebalance_trades_toward_targets() {
    let h = harness(Arc::new(FixedAssessor::new(10.0, SafetyGrade::A)), Vec::new());
    let pid = moderate_portfolio(&h.engine, &[]).await;
    let quote = h.engine.settings().quote_token.clone();
    h.engine
        .create_rebalance_strategy(
            &pid,
            "core",
            RebalanceStrategyType::Fixed,
            targets(&[(WETH, dec!(0.3)), (LINK, dec!(0.2)), (quote.as_str(), dec!(0.5))]),
        )
        .unwrap();
    let mut rx = h.engine.subscribe();

    let outcome = h.engine.rebalance_portfolio(&pid).await.unwrap().expect("drift should fire");
    assert!(outcome.triggers.contains(&"drift"));
    assert_eq!(outcome.executed, 2);

    let portfolio = h.engine.portfolio(&pid).await.unwrap();
    assert_eq!(portfolio.holdings[WETH].value, dec!(3000));
    assert_eq!(portfolio.holdings[LINK].value, dec!(2000));
    assert_eq!(portfolio.available_balance, dec!(5000));
    assert!(portfolio.invariant_holds(tolerance()));
    assert!(h.engine.rebalance_strategy(&pid).unwrap().last_rebalance.is_some());

    let completed = drain(&mut rx)
        .into_iter()
        .any(|e| matches!(e, EngineEvent::RebalanceCompleted { actions: 2, .. }));
    assert!(completed);

    // On target and not yet due.
    assert!(h.engine.rebalance_portfolio(&pid).await.unwrap().is_none());

    let (_tx, rx) = watch::channel(false);
    h.market.set_price(WETH, dec!(4000));
    assert_eq!(h.engine.rebalance_tick(&rx).await, 1);
    let portfolio = h.engine.portfolio(&pid).await.unwrap();
    let weth_share = portfolio.holdings[WETH].value / portfolio.total_value;
    assert!((weth_share - dec!(0.3)).abs() < dec!(0.001));
    assert!(portfolio.invariant_holds(tolerance()));
}

#[tokio::test]
async fn yield_targets_route_through_the_protocol_manager() {
    let quote = EngineSettings::default().quote_token;
    let rule_for = |pid: &str| {
        RebalanceStrategy::new(
            pid,
            "yield",
            RebalanceStrategyType::Fixed,
            targets(&[(LINK, dec!(0.5)), (quote.as_str(), dec!(0.5))]),
        )
        .unwrap()
        .with_yield_target(LINK, "aave")
    };

    // Without a protocol manager the action fails but the rebalance still completes.
    let h = harness(Arc::new(FixedAssessor::new(10.0, SafetyGrade::A)), Vec::new());
    let pid = moderate_portfolio(&h.engine, &[]).await;
    h.engine.set_rebalance_strategy(rule_for(&pid)).unwrap();
    let outcome = h.engine.rebalance_portfolio(&pid).await.unwrap().unwrap();
    assert_eq!(outcome.executed, 0);
    assert_eq!(h.engine.portfolio(&pid).await.unwrap().available_balance, dec!(10_000));
    assert!(h.engine.rebalance_strategy(&pid).unwrap().last_rebalance.is_some());
    assert!(matches!(h.engine.yield_positions().await, Err(Error::NoProtocolManager)));

    // With one, the bought tokens are deposited.
    let protocols = Arc::new(RecordingProtocols::default());
    let market = Arc::new(InMemoryMarketData::new());
    market.set(MarketData::new(LINK, "LINK", dec!(10)));
    let engine = TradingEngine::new(
        EngineSettings::default(),
        Arc::new(FixedAssessor::new(10.0, SafetyGrade::A)),
        market,
        Arc::new(SimulatedExecutor::new(&SimulationSettings { taker_fee: 0.0, slippage_percent: 0.0 }).unwrap()),
        Vec::new(),
    )
    .with_protocol_manager(protocols.clone());
    let pid = moderate_portfolio(&engine, &[]).await;
    engine.set_rebalance_strategy(rule_for(&pid)).unwrap();

    let outcome = engine.rebalance_portfolio(&pid).await.unwrap().unwrap();
    assert_eq!(outcome.executed, 1);
    let deposits = protocols.actions.lock().unwrap().clone();
    assert_eq!(deposits.len(), 1);
    assert_eq!(deposits[0].kind, DefiActionKind::Deposit);
    assert_eq!(deposits[0].protocol, "aave");
    assert_eq!(deposits[0].amount, dec!(500));

    let positions = engine.yield_positions().await.unwrap();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].token, LINK);
}
