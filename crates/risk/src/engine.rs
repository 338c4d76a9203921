// In crates/risk/src/engine.rs

use crate::analyzers::{self, Findings};
use crate::cache::AssessmentCache;
use crate::chain::ChainClient;
use crate::ml::{Features, ModelKind, ModelOutcome, ModelRegistry, RiskModel};
use crate::scoring;
use crate::screen::{AddressScreen, StaticDenylist};
use crate::types::{ContractRiskRequest, RiskSettings, TransactionRiskRequest};
use crate::{Error, Result, RiskAssessor};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use core_types::RiskAssessment;
use database::Store;
use num_traits::ToPrimitive;
use std::collections::HashMap;
use std::sync::Arc;

/// The multi-factor risk assessment engine.
///
/// Runs the heuristic analyzers, optionally folds in model predictions,
/// aggregates everything into a score and grade, and caches the result under
/// the request fingerprint for `cache_ttl_secs`.
pub struct RiskEngine {
    settings: RiskSettings,
    cache: AssessmentCache,
    screens: Vec<Arc<dyn AddressScreen>>,
    models: ModelRegistry,
    chains: HashMap<u64, Arc<dyn ChainClient>>,
    store: Option<Arc<dyn Store>>,
}

impl RiskEngine {
    /// An engine with the static denylist and the bundled models.
    pub fn new(settings: RiskSettings) -> Self {
        let ttl = Duration::seconds(settings.cache_ttl_secs as i64);
        let denylist: Arc<dyn AddressScreen> = Arc::new(StaticDenylist::new(&settings.denylist));
        let models = ModelRegistry::with_defaults(settings.ml_factor_weight);
        Self {
            settings,
            cache: AssessmentCache::new(ttl),
            screens: vec![denylist],
            models,
            chains: HashMap::new(),
            store: None,
        }
    }

    pub fn with_chain_client(mut self, client: Arc<dyn ChainClient>) -> Self {
        self.chains.insert(client.chain_id(), client);
        self
    }

    pub fn with_model(mut self, model: Arc<dyn RiskModel>) -> Self {
        self.models.register(model);
        self
    }

    pub fn without_models(mut self) -> Self {
        self.models = ModelRegistry::new(self.settings.ml_factor_weight);
        self
    }

    pub fn with_screen(mut self, screen: Arc<dyn AddressScreen>) -> Self {
        self.screens.push(screen);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn cache(&self) -> &AssessmentCache {
        &self.cache
    }

    pub fn settings(&self) -> &RiskSettings {
        &self.settings
    }

    /// Scores a proposed transaction, serving from cache when possible.
    pub async fn assess_transaction_risk(&self, request: &TransactionRiskRequest) -> Result<RiskAssessment> {
        request.validate()?;
        let key = request.cache_key();
        let (assessment, cached) = self
            .cache
            .get_or_compute(&key, || self.build_transaction_assessment(request))
            .await?;

        if cached {
            tracing::debug!(assessment_id = %assessment.id, "Transaction assessment served from cache.");
        } else {
            tracing::info!(
                assessment_id = %assessment.id,
                to = %request.to,
                score = assessment.risk_score,
                grade = %assessment.safety_grade,
                factors = assessment.factors.len(),
                "Transaction risk assessed."
            );
            self.persist(&assessment).await;
        }
        Ok(assessment)
    }

    /// Scores a deployed contract. A chain client for `request.chain_id` is required.
    pub async fn assess_contract_risk(&self, request: &ContractRiskRequest) -> Result<RiskAssessment> {
        request.validate()?;
        let client = self
            .chains
            .get(&request.chain_id)
            .cloned()
            .ok_or(Error::NoChainClient { chain_id: request.chain_id })?;

        let key = request.cache_key();
        let (assessment, cached) = self
            .cache
            .get_or_compute(&key, || self.build_contract_assessment(request, client))
            .await?;

        if cached {
            tracing::debug!(assessment_id = %assessment.id, "Contract assessment served from cache.");
        } else {
            tracing::info!(
                assessment_id = %assessment.id,
                contract = %request.address,
                score = assessment.risk_score,
                grade = %assessment.safety_grade,
                factors = assessment.factors.len(),
                "Contract risk assessed."
            );
            self.persist(&assessment).await;
        }
        Ok(assessment)
    }

    /// Drops expired cache entries. Returns how many were removed.
    pub fn purge_cache(&self) -> usize {
        self.cache.purge_expired(Utc::now())
    }

    async fn build_transaction_assessment(&self, request: &TransactionRiskRequest) -> Result<RiskAssessment> {
        let call_data = request.call_data()?;
        let findings = analyzers::transaction::analyze(request, &call_data, &self.settings, &self.screens);

        let models = if self.wants_models(request.include_ml) {
            let features = Features::new()
                .with("log_value", request.value.to_f64().unwrap_or(0.0).max(0.0).ln_1p())
                .with("gas_limit_millions", request.gas_limit as f64 / 1_000_000.0)
                .with("gas_price_hundreds_gwei", request.gas_price.to_f64().unwrap_or(0.0) / 100.0)
                .with("call_data_kib", call_data.len() as f64 / 1024.0)
                .with("heuristic_pressure", findings.heuristic_pressure());
            Some(self.models.run(&[ModelKind::TransactionRisk], &features).await)
        } else {
            None
        };

        Ok(self.finish(
            findings,
            models,
            request.transaction_hash.clone(),
            None,
            request.chain_id,
        ))
    }

    async fn build_contract_assessment(
        &self,
        request: &ContractRiskRequest,
        client: Arc<dyn ChainClient>,
    ) -> Result<RiskAssessment> {
        let (findings, report) = analyzers::contract::analyze(request, client.as_ref(), &self.settings).await?;

        let models = if self.wants_models(request.include_ml) {
            let report = report.unwrap_or_default();
            let features = Features::new()
                .with("dangerous_opcodes", report.dangerous_opcode_count() as f64)
                .with("unchecked_calls", report.unchecked_calls as f64)
                .with("is_proxy", if report.is_proxy() { 1.0 } else { 0.0 })
                .with("heuristic_pressure", findings.heuristic_pressure())
                .with("honeypot_density", report.honeypot_density())
                .with("mint_functions", report.mint_signatures().len() as f64)
                .with("has_selfdestruct", if report.has_selfdestruct { 1.0 } else { 0.0 });
            let kinds: &[ModelKind] = if request.check_rug_pull {
                &[ModelKind::ContractRisk, ModelKind::RugPullDetection]
            } else {
                &[ModelKind::ContractRisk]
            };
            Some(self.models.run(kinds, &features).await)
        } else {
            None
        };

        Ok(self.finish(
            findings,
            models,
            None,
            Some(request.address.to_ascii_lowercase()),
            request.chain_id,
        ))
    }

    fn wants_models(&self, requested: bool) -> bool {
        requested && self.settings.ml_enabled
    }

    fn finish(
        &self,
        mut findings: Findings,
        models: Option<ModelOutcome>,
        transaction_hash: Option<String>,
        contract_address: Option<String>,
        chain_id: u64,
    ) -> RiskAssessment {
        let mut confidence = scoring::heuristic_confidence(findings.factors.len());

        let ml_predictions = models.map(|outcome| {
            confidence = scoring::model_adjusted_confidence(
                confidence,
                outcome.predictions.len(),
                outcome.failures.len(),
            );
            for model in &outcome.failures {
                findings.warn(format!("Model {model} unavailable; assessment uses heuristic factors only"));
            }
            findings.factors.extend(outcome.factors);
            outcome.predictions
        });

        let (risk_score, safety_grade) = scoring::aggregate(&findings.factors);
        let recommendations = scoring::recommendations(safety_grade, &findings.factors);
        let assessed_at = Utc::now();

        RiskAssessment {
            id: core_types::new_id(),
            transaction_hash,
            contract_address,
            chain_id,
            risk_score,
            safety_grade,
            confidence,
            factors: findings.factors,
            recommendations,
            warnings: findings.warnings,
            ml_predictions,
            assessed_at,
            expires_at: assessed_at + self.cache.ttl(),
        }
    }

    async fn persist(&self, assessment: &RiskAssessment) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_assessment(assessment).await {
                tracing::warn!(assessment_id = %assessment.id, error = %e, "Failed to persist assessment.");
            }
        }
    }
}

#[async_trait]
impl RiskAssessor for RiskEngine {
    async fn assess_transaction(&self, request: &TransactionRiskRequest) -> Result<RiskAssessment> {
        self.assess_transaction_risk(request).await
    }

    async fn assess_contract(&self, request: &ContractRiskRequest) -> Result<RiskAssessment> {
        self.assess_contract_risk(request).await
    }

    fn purge_expired(&self) -> usize {
        self.purge_cache()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainError;
    use core_types::SafetyGrade;
    use database::MemoryStore;
    use rust_decimal_macros::dec;

    const SENDER: &str = "0x5aeda56215b167893e80b4fe645ba6d5bab767de";
    const RECIPIENT: &str = "0x8ba1f109551bd432803012645ac136ddd64dba72";

    fn transfer(value: rust_decimal::Decimal) -> TransactionRiskRequest {
        TransactionRiskRequest {
            from: SENDER.to_string(),
            to: RECIPIENT.to_string(),
            value,
            data: None,
            chain_id: 1,
            gas_limit: 21_000,
            gas_price: dec!(20),
            transaction_hash: None,
            include_ml: false,
        }
    }

    struct DownModel;

    #[async_trait]
    impl RiskModel for DownModel {
        fn kind(&self) -> ModelKind {
            ModelKind::TransactionRisk
        }

        async fn predict(&self, _features: &Features) -> Result<f64> {
            Err(Error::Model {
                model: "transaction_risk".to_string(),
                reason: "connection refused".to_string(),
            })
        }
    }

    struct FailingChain;

    #[async_trait]
    impl ChainClient for FailingChain {
        fn chain_id(&self) -> u64 {
            1
        }

        async fn get_code(&self, _address: &str) -> std::result::Result<Vec<u8>, ChainError> {
            Err(ChainError::Rpc("node unreachable".to_string()))
        }

        async fn block_number(&self) -> std::result::Result<u64, ChainError> {
            Err(ChainError::Timeout)
        }

        async fn call_contract(&self, _to: &str, _data: &[u8]) -> std::result::Result<Vec<u8>, ChainError> {
            Err(ChainError::Timeout)
        }
    }

    #[tokio::test]
    async fn high_value_transfer_scores_above_zero() {
        let engine = RiskEngine::new(RiskSettings::default());
        let assessment = engine.assess_transaction_risk(&transfer(dec!(200))).await.unwrap();
        assert!(assessment.has_factor("high_value"));
        assert!(assessment.risk_score > 0.0);
        assert!(assessment.ml_predictions.is_none());
    }

    #[tokio::test]
    async fn zero_address_destination_is_flagged() {
        let engine = RiskEngine::new(RiskSettings::default());
        let mut request = transfer(dec!(1));
        request.to = crate::screen::ZERO_ADDRESS.to_string();
        let assessment = engine.assess_transaction_risk(&request).await.unwrap();
        assert!(assessment.has_factor("malicious_address"));
        assert!(!assessment.warnings.is_empty());
        assert_eq!(assessment.safety_grade, SafetyGrade::F);
    }

    #[tokio::test]
    async fn identical_requests_share_one_assessment() {
        let store = Arc::new(MemoryStore::new());
        let engine = RiskEngine::new(RiskSettings::default()).with_store(store.clone());
        let first = engine.assess_transaction_risk(&transfer(dec!(5))).await.unwrap();
        let second = engine.assess_transaction_risk(&transfer(dec!(5.0))).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.assessment_count(), 1);
        assert!(first.expires_at > first.assessed_at);
    }

    #[tokio::test]
    async fn model_failure_degrades_confidence_without_error() {
        let engine = RiskEngine::new(RiskSettings::default()).with_model(Arc::new(DownModel));
        let mut request = transfer(dec!(200));
        request.include_ml = true;
        let degraded = engine.assess_transaction_risk(&request).await.unwrap();

        let baseline = RiskEngine::new(RiskSettings::default())
            .assess_transaction_risk(&transfer(dec!(200)))
            .await
            .unwrap();

        assert!(degraded.confidence < baseline.confidence);
        assert!(degraded.ml_predictions.as_ref().is_some_and(|p| p.is_empty()));
        assert!(degraded.warnings.iter().any(|w| w.contains("transaction_risk")));
    }

    #[tokio::test]
    async fn ml_predictions_are_recorded_when_enabled() {
        let engine = RiskEngine::new(RiskSettings::default());
        let mut request = transfer(dec!(200));
        request.include_ml = true;
        let assessment = engine.assess_transaction_risk(&request).await.unwrap();
        let predictions = assessment.ml_predictions.as_ref().unwrap();
        assert!(predictions.contains_key("transaction_risk"));
        assert!(assessment.has_factor("ml_prediction"));
    }

    #[tokio::test]
    async fn contract_assessment_requires_a_chain_client() {
        let engine = RiskEngine::new(RiskSettings::default());
        let request = ContractRiskRequest {
            address: RECIPIENT.to_string(),
            chain_id: 137,
            include_ml: false,
            check_rug_pull: false,
        };
        assert!(matches!(
            engine.assess_contract_risk(&request).await,
            Err(Error::NoChainClient { chain_id: 137 })
        ));
    }

    #[tokio::test]
    async fn bytecode_fetch_failure_is_a_hard_error() {
        let engine = RiskEngine::new(RiskSettings::default()).with_chain_client(Arc::new(FailingChain));
        let request = ContractRiskRequest {
            address: RECIPIENT.to_string(),
            chain_id: 1,
            include_ml: true,
            check_rug_pull: true,
        };
        assert!(matches!(engine.assess_contract_risk(&request).await, Err(Error::Chain(_))));
        assert!(engine.cache().is_empty());
    }
}
