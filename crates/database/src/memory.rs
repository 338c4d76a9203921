// In crates/database/src/memory.rs

use crate::{Result, Store};
use async_trait::async_trait;
use core_types::{Portfolio, Position, RiskAssessment};
use parking_lot::RwLock;
use std::collections::HashMap;

/// A process-local store used when no database is configured, and in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    portfolios: RwLock<HashMap<String, Portfolio>>,
    positions: RwLock<HashMap<String, Position>>,
    assessments: RwLock<HashMap<String, RiskAssessment>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn portfolio(&self, id: &str) -> Option<Portfolio> {
        self.portfolios.read().get(id).cloned()
    }

    pub fn position(&self, id: &str) -> Option<Position> {
        self.positions.read().get(id).cloned()
    }

    pub fn assessment_count(&self) -> usize {
        self.assessments.read().len()
    }

    pub fn position_count(&self) -> usize {
        self.positions.read().len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn save_portfolio(&self, portfolio: &Portfolio) -> Result<()> {
        self.portfolios.write().insert(portfolio.id.clone(), portfolio.clone());
        Ok(())
    }

    async fn save_position(&self, position: &Position) -> Result<()> {
        self.positions.write().insert(position.id.clone(), position.clone());
        Ok(())
    }

    async fn save_assessment(&self, assessment: &RiskAssessment) -> Result<()> {
        self.assessments.write().insert(assessment.id.clone(), assessment.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{RiskLevel, RiskProfile};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn upserts_replace_by_id() {
        let store = MemoryStore::new();
        let mut portfolio = Portfolio::new(
            "user-1",
            "main",
            dec!(1000),
            RiskProfile::for_level(RiskLevel::Moderate),
            Vec::new(),
        );
        store.save_portfolio(&portfolio).await.unwrap();

        portfolio.available_balance = dec!(400);
        store.save_portfolio(&portfolio).await.unwrap();

        let saved = store.portfolio(&portfolio.id).unwrap();
        assert_eq!(saved.available_balance, dec!(400));
    }
}
