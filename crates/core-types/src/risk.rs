// In crates/core-types/src/risk.rs

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// One explainable contribution to an aggregate risk score.
///
/// `impact` ranges over `[-1, 1]`: negative values mitigate risk, positive values
/// aggravate it. `weight` ranges over `[0, 1]` and expresses how much the factor
/// should count relative to the others.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    #[serde(rename = "type")]
    pub factor_type: String,
    pub description: String,
    pub impact: f64,
    pub weight: f64,
    pub evidence: String,
}

impl RiskFactor {
    /// Creates a factor, clamping `impact` and `weight` into their valid ranges.
    pub fn new(
        factor_type: impl Into<String>,
        description: impl Into<String>,
        impact: f64,
        weight: f64,
        evidence: impl Into<String>,
    ) -> Self {
        Self {
            factor_type: factor_type.into(),
            description: description.into(),
            impact: impact.clamp(-1.0, 1.0),
            weight: weight.clamp(0.0, 1.0),
            evidence: evidence.into(),
        }
    }

    /// The signed contribution of this factor before normalisation.
    pub fn contribution(&self) -> f64 {
        self.impact * self.weight
    }

    pub fn is_aggravating(&self) -> bool {
        self.impact > 0.0
    }
}

/// Letter bucket summarising a risk score. `A` is excellent, `F` is fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SafetyGrade {
    A,
    B,
    C,
    D,
    F,
}

impl SafetyGrade {
    /// Maps a `[0, 100]` score onto a grade.
    ///
    /// Cut points: A ≤ 20 < B ≤ 40 < C ≤ 60 < D ≤ 80 < F.
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s <= 20.0 => SafetyGrade::A,
            s if s <= 40.0 => SafetyGrade::B,
            s if s <= 60.0 => SafetyGrade::C,
            s if s <= 80.0 => SafetyGrade::D,
            _ => SafetyGrade::F,
        }
    }
}

impl fmt::Display for SafetyGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self {
            SafetyGrade::A => "A",
            SafetyGrade::B => "B",
            SafetyGrade::C => "C",
            SafetyGrade::D => "D",
            SafetyGrade::F => "F",
        };
        f.write_str(letter)
    }
}

impl FromStr for SafetyGrade {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(SafetyGrade::A),
            "B" => Ok(SafetyGrade::B),
            "C" => Ok(SafetyGrade::C),
            "D" => Ok(SafetyGrade::D),
            "F" => Ok(SafetyGrade::F),
            other => Err(Error::UnknownGrade(other.to_string())),
        }
    }
}

/// The full, explainable result of assessing a transaction or a contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub id: String,
    pub transaction_hash: Option<String>,
    pub contract_address: Option<String>,
    pub chain_id: u64,
    pub risk_score: f64,
    pub safety_grade: SafetyGrade,
    pub confidence: f64,
    pub factors: Vec<RiskFactor>,
    pub recommendations: Vec<String>,
    pub warnings: Vec<String>,
    /// Model name to prediction in `[0, 1]`. Absent when no model was consulted.
    pub ml_predictions: Option<HashMap<String, f64>>,
    pub assessed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RiskAssessment {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn has_factor(&self, factor_type: &str) -> bool {
        self.factors.iter().any(|f| f.factor_type == factor_type)
    }
}
