// In crates/risk/src/ml.rs

//! Model-based augmentation of heuristic risk factors.
//!
//! Models are optional. A model that errors is reported back to the caller as a
//! failure and the assessment carries on with its heuristic factors.

use crate::{Error, Result};
use async_trait::async_trait;
use core_types::RiskFactor;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    TransactionRisk,
    ContractRisk,
    RugPullDetection,
}

impl ModelKind {
    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::TransactionRisk => "transaction_risk",
            ModelKind::ContractRisk => "contract_risk",
            ModelKind::RugPullDetection => "rug_pull_detection",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Named numeric inputs for a model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Features(BTreeMap<String, f64>);

impl Features {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.0.insert(name.to_string(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.0.iter()
    }
}

/// A scoring model producing the probability that the subject is risky.
#[async_trait]
pub trait RiskModel: Send + Sync {
    fn kind(&self) -> ModelKind;

    async fn predict(&self, features: &Features) -> Result<f64>;
}

/// A logistic regression over named features.
#[derive(Debug, Clone)]
pub struct LogisticModel {
    kind: ModelKind,
    bias: f64,
    coefficients: HashMap<String, f64>,
}

impl LogisticModel {
    pub fn new(kind: ModelKind, bias: f64, coefficients: HashMap<String, f64>) -> Self {
        Self { kind, bias, coefficients }
    }

    pub fn transaction_default() -> Self {
        Self::new(
            ModelKind::TransactionRisk,
            -2.0,
            HashMap::from([
                ("log_value".to_string(), 0.6),
                ("gas_limit_millions".to_string(), 0.8),
                ("gas_price_hundreds_gwei".to_string(), 0.5),
                ("call_data_kib".to_string(), 0.3),
                ("heuristic_pressure".to_string(), 3.0),
            ]),
        )
    }

    pub fn contract_default() -> Self {
        Self::new(
            ModelKind::ContractRisk,
            -1.5,
            HashMap::from([
                ("dangerous_opcodes".to_string(), 0.7),
                ("unchecked_calls".to_string(), 0.4),
                ("is_proxy".to_string(), 0.5),
                ("heuristic_pressure".to_string(), 2.5),
            ]),
        )
    }

    pub fn rug_pull_default() -> Self {
        Self::new(
            ModelKind::RugPullDetection,
            -2.5,
            HashMap::from([
                ("honeypot_density".to_string(), 0.3),
                ("mint_functions".to_string(), 1.2),
                ("has_selfdestruct".to_string(), 0.8),
            ]),
        )
    }
}

#[async_trait]
impl RiskModel for LogisticModel {
    fn kind(&self) -> ModelKind {
        self.kind
    }

    async fn predict(&self, features: &Features) -> Result<f64> {
        let mut z = self.bias;
        for (name, coefficient) in &self.coefficients {
            let value = features.get(name).unwrap_or(0.0);
            if !value.is_finite() {
                return Err(Error::Model {
                    model: self.kind.to_string(),
                    reason: format!("feature {name} is not finite"),
                });
            }
            z += coefficient * value;
        }
        Ok(1.0 / (1.0 + (-z).exp()))
    }
}

/// What a round of model calls produced.
#[derive(Debug, Clone, Default)]
pub struct ModelOutcome {
    pub predictions: HashMap<String, f64>,
    pub factors: Vec<RiskFactor>,
    pub failures: Vec<String>,
}

/// The set of models available to the engine, one per kind.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    models: HashMap<ModelKind, Arc<dyn RiskModel>>,
    factor_weight: f64,
}

impl ModelRegistry {
    pub fn new(factor_weight: f64) -> Self {
        Self {
            models: HashMap::new(),
            factor_weight,
        }
    }

    /// A registry holding the bundled logistic models for every kind.
    pub fn with_defaults(factor_weight: f64) -> Self {
        let mut registry = Self::new(factor_weight);
        registry.register(Arc::new(LogisticModel::transaction_default()));
        registry.register(Arc::new(LogisticModel::contract_default()));
        registry.register(Arc::new(LogisticModel::rug_pull_default()));
        registry
    }

    /// Registers a model, replacing any previous model of the same kind.
    pub fn register(&mut self, model: Arc<dyn RiskModel>) {
        self.models.insert(model.kind(), model);
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Runs every requested model that is registered. Failures are logged and
    /// collected; they never abort the round.
    pub async fn run(&self, kinds: &[ModelKind], features: &Features) -> ModelOutcome {
        let mut outcome = ModelOutcome::default();
        for kind in kinds {
            let Some(model) = self.models.get(kind) else {
                tracing::debug!(model = %kind, "No model registered, skipping.");
                continue;
            };
            match model.predict(features).await {
                Ok(p) if (0.0..=1.0).contains(&p) => {
                    outcome.predictions.insert(kind.to_string(), p);
                    outcome.factors.push(RiskFactor::new(
                        "ml_prediction",
                        format!("{kind} model prediction"),
                        2.0 * p - 1.0,
                        self.factor_weight,
                        format!("p={p:.3}"),
                    ));
                }
                Ok(p) => {
                    tracing::warn!(model = %kind, prediction = p, "Model returned an out-of-range prediction; ignoring it.");
                    outcome.failures.push(kind.to_string());
                }
                Err(e) => {
                    tracing::warn!(model = %kind, error = %e, "Model unavailable; continuing with heuristic factors only.");
                    outcome.failures.push(kind.to_string());
                }
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenModel;

    #[async_trait]
    impl RiskModel for BrokenModel {
        fn kind(&self) -> ModelKind {
            ModelKind::TransactionRisk
        }

        async fn predict(&self, _features: &Features) -> Result<f64> {
            Err(Error::Model {
                model: "transaction_risk".to_string(),
                reason: "endpoint unreachable".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn logistic_model_is_a_probability() {
        let model = LogisticModel::transaction_default();
        let low = model.predict(&Features::new()).await.unwrap();
        let high = model
            .predict(&Features::new().with("heuristic_pressure", 1.0).with("log_value", 4.0))
            .await
            .unwrap();
        assert!(low > 0.0 && low < 0.5);
        assert!(high > low);
    }

    #[tokio::test]
    async fn failures_are_collected_not_raised() {
        let mut registry = ModelRegistry::new(0.3);
        registry.register(Arc::new(BrokenModel));
        let outcome = registry
            .run(&[ModelKind::TransactionRisk, ModelKind::ContractRisk], &Features::new())
            .await;
        assert!(outcome.predictions.is_empty());
        assert_eq!(outcome.failures, vec!["transaction_risk".to_string()]);
    }

    #[tokio::test]
    async fn predictions_become_factors() {
        let registry = ModelRegistry::with_defaults(0.3);
        let outcome = registry.run(&[ModelKind::ContractRisk], &Features::new()).await;
        assert!(outcome.predictions.contains_key("contract_risk"));
        assert_eq!(outcome.factors.len(), 1);
        assert_eq!(outcome.factors[0].factor_type, "ml_prediction");
    }
}
