// In crates/risk/src/analyzers/mod.rs

//! Factor analyzers. Each analyzer appends zero or more factors and warnings
//! to a shared [`Findings`] and never aborts the assessment on its own.

pub mod contract;
pub mod transaction;

use core_types::RiskFactor;

/// Factors and warnings gathered while analysing one request.
#[derive(Debug, Clone, Default)]
pub struct Findings {
    pub factors: Vec<RiskFactor>,
    pub warnings: Vec<String>,
}

impl Findings {
    pub fn push(&mut self, factor: RiskFactor) {
        self.factors.push(factor);
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Sum of positive contributions, normalised by factor count. Fed to the
    /// models as a summary of what the heuristics already saw.
    pub fn heuristic_pressure(&self) -> f64 {
        if self.factors.is_empty() {
            return 0.0;
        }
        let aggravating: f64 = self
            .factors
            .iter()
            .filter(|f| f.is_aggravating())
            .map(RiskFactor::contribution)
            .sum();
        aggravating / self.factors.len() as f64
    }

    pub fn has(&self, factor_type: &str) -> bool {
        self.factors.iter().any(|f| f.factor_type == factor_type)
    }
}
