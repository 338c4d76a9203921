// In crates/events/src/lib.rs

// --- Engine notification structures ---

use chrono::{DateTime, Utc};
use core_types::{Execution, Portfolio, SafetyGrade};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::broadcast;

/// Capacity of the engine's notification channel. Slow subscribers lag and
/// skip ahead rather than block the engine.
pub const CHANNEL_CAPACITY: usize = 1024;

/// A compact view of a portfolio after it changed.
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioSnapshot {
    pub portfolio_id: String,
    pub total_value: Decimal,
    pub available_balance: Decimal,
    pub invested_amount: Decimal,
    pub daily_pnl: Decimal,
    pub total_pnl: Decimal,
    pub open_positions: usize,
    pub updated_at: DateTime<Utc>,
}

impl From<&Portfolio> for PortfolioSnapshot {
    fn from(p: &Portfolio) -> Self {
        Self {
            portfolio_id: p.id.clone(),
            total_value: p.total_value,
            available_balance: p.available_balance,
            invested_amount: p.invested_amount,
            daily_pnl: p.daily_pnl,
            total_pnl: p.total_pnl,
            open_positions: p.active_positions.len(),
            updated_at: p.updated_at,
        }
    }
}

/// Why a signal never reached execution.
#[derive(Debug, Clone, Serialize)]
pub struct SignalRejection {
    pub portfolio_id: String,
    pub strategy: String,
    pub signal_id: String,
    pub reason: String,
    pub risk_score: Option<f64>,
    pub safety_grade: Option<SafetyGrade>,
}

/// The top-level engine event enum.
/// `tag` and `content` are used by serde for clean JSON representation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum EngineEvent {
    TradeExecuted {
        strategy: String,
        position_id: Option<String>,
        execution: Execution,
    },
    PositionClosed {
        portfolio_id: String,
        position_id: String,
        reason: String,
        realized_pnl: Decimal,
    },
    SignalRejected(SignalRejection),
    RebalanceCompleted {
        portfolio_id: String,
        actions: usize,
        at: DateTime<Utc>,
    },
    PortfolioUpdated(PortfolioSnapshot),
}

/// Creates the engine's broadcast channel.
pub fn channel() -> (broadcast::Sender<EngineEvent>, broadcast::Receiver<EngineEvent>) {
    broadcast::channel(CHANNEL_CAPACITY)
}

/// Publishes `event`. Having no subscribers is not an error.
pub fn publish(tx: &broadcast::Sender<EngineEvent>, event: EngineEvent) {
    if tx.send(event).is_err() {
        tracing::trace!("No event subscribers; event dropped.");
    }
}

/// Serialises an event for log sinks and external dispatchers.
pub fn to_json(event: &EngineEvent) -> serde_json::Result<String> {
    serde_json::to_string(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{RiskLevel, RiskProfile};
    use rust_decimal_macros::dec;

    #[test]
    fn publishing_without_subscribers_is_harmless() {
        let (tx, rx) = channel();
        drop(rx);
        publish(
            &tx,
            EngineEvent::RebalanceCompleted {
                portfolio_id: "p".to_string(),
                actions: 0,
                at: Utc::now(),
            },
        );
    }

    #[tokio::test]
    async fn snapshot_events_serialise_with_type_tag() {
        let (tx, mut rx) = channel();
        let portfolio = Portfolio::new(
            "user",
            "main",
            dec!(500),
            RiskProfile::for_level(RiskLevel::Conservative),
            Vec::new(),
        );
        publish(&tx, EngineEvent::PortfolioUpdated(PortfolioSnapshot::from(&portfolio)));

        let event = rx.recv().await.unwrap();
        let json = to_json(&event).unwrap();
        assert!(json.contains("\"type\":\"PortfolioUpdated\""));
        assert!(json.contains("\"total_value\":\"500\""));
    }
}
