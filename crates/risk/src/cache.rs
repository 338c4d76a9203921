// In crates/risk/src/cache.rs

use crate::Result;
use chrono::{DateTime, Duration, Utc};
use core_types::RiskAssessment;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};

/// A TTL cache of assessments keyed by request fingerprint.
///
/// Concurrent lookups for the same fingerprint are de-duplicated: the first
/// caller computes while later callers wait on a per-key gate and then read the
/// cached result.
pub struct AssessmentCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, RiskAssessment>>,
    in_flight: Mutex<HashMap<String, Weak<tokio::sync::Mutex<()>>>>,
}

impl AssessmentCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached assessment unless it has expired at `now`.
    pub fn get(&self, key: &str, now: DateTime<Utc>) -> Option<RiskAssessment> {
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(hit) if !hit.is_expired(now) => return Some(hit.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        self.entries.write().remove(key);
        None
    }

    pub fn insert(&self, key: &str, assessment: RiskAssessment) {
        self.entries.write().insert(key.to_string(), assessment);
    }

    /// Drops every entry expired at `now`, returning how many were removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, a| !a.is_expired(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serves `key` from cache or runs `compute` at most once across concurrent callers.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, compute: F) -> Result<(RiskAssessment, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<RiskAssessment>>,
    {
        if let Some(hit) = self.get(key, Utc::now()) {
            return Ok((hit, true));
        }

        let gate = self.gate(key);
        let _guard = gate.lock().await;

        if let Some(hit) = self.get(key, Utc::now()) {
            return Ok((hit, true));
        }

        let fresh = compute().await?;
        self.insert(key, fresh.clone());
        Ok((fresh, false))
    }

    fn gate(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut in_flight = self.in_flight.lock();
        in_flight.retain(|_, gate| gate.strong_count() > 0);
        if let Some(existing) = in_flight.get(key).and_then(Weak::upgrade) {
            return existing;
        }
        let gate = Arc::new(tokio::sync::Mutex::new(()));
        in_flight.insert(key.to_string(), Arc::downgrade(&gate));
        gate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::SafetyGrade;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn assessment(expires_at: DateTime<Utc>) -> RiskAssessment {
        RiskAssessment {
            id: core_types::new_id(),
            transaction_hash: None,
            contract_address: None,
            chain_id: 1,
            risk_score: 10.0,
            safety_grade: SafetyGrade::A,
            confidence: 0.5,
            factors: Vec::new(),
            recommendations: Vec::new(),
            warnings: Vec::new(),
            ml_predictions: None,
            assessed_at: Utc::now(),
            expires_at,
        }
    }

    #[test]
    fn expired_entries_are_never_returned() {
        let cache = AssessmentCache::new(Duration::seconds(60));
        cache.insert("k", assessment(Utc::now() - Duration::seconds(1)));
        assert!(cache.get("k", Utc::now()).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn purge_removes_only_expired() {
        let cache = AssessmentCache::new(Duration::seconds(60));
        cache.insert("old", assessment(Utc::now() - Duration::seconds(1)));
        cache.insert("new", assessment(Utc::now() + Duration::seconds(60)));
        assert_eq!(cache.purge_expired(Utc::now()), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_identical_requests_compute_once() {
        let cache = Arc::new(AssessmentCache::new(Duration::seconds(60)));
        let computations = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let computations = computations.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("same", || async {
                        computations.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        Ok(assessment(Utc::now() + Duration::seconds(60)))
                    })
                    .await
                    .map(|(a, _)| a.id)
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap());
        }
        assert_eq!(computations.load(Ordering::SeqCst), 1);
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
    }
}
