// In crates/risk/src/scoring.rs

use core_types::{RiskFactor, SafetyGrade};

/// A single factor whose `impact × weight` reaches this value is critical and
/// floors the aggregate score at its own contribution.
pub const CRITICAL_CONTRIBUTION: f64 = 0.8;

/// Folds a factor list into a `[0, 100]` score and its grade.
///
/// `score = 100 × Σ(impact × weight) / Σ(weight)`, clamped, then raised to the
/// largest critical contribution so that a mitigating factor can never dilute a
/// denylist hit back into an acceptable grade.
pub fn aggregate(factors: &[RiskFactor]) -> (f64, SafetyGrade) {
    let total_weight: f64 = factors.iter().map(|f| f.weight).sum();
    let weighted = if total_weight > 0.0 {
        100.0 * factors.iter().map(RiskFactor::contribution).sum::<f64>() / total_weight
    } else {
        0.0
    };

    let critical_floor = factors
        .iter()
        .map(RiskFactor::contribution)
        .filter(|c| *c >= CRITICAL_CONTRIBUTION)
        .fold(0.0_f64, f64::max)
        * 100.0;

    let score = weighted.max(critical_floor).clamp(0.0, 100.0);
    (score, SafetyGrade::from_score(score))
}

/// Confidence in a heuristic-only assessment grows with the evidence found.
pub fn heuristic_confidence(factor_count: usize) -> f64 {
    (0.5 + 0.1 * factor_count as f64).min(0.8)
}

/// Adjusts confidence for the models that answered and the ones that failed.
pub fn model_adjusted_confidence(base: f64, succeeded: usize, failed: usize) -> f64 {
    let raised = (base + 0.05 * succeeded as f64).min(0.95);
    (raised - 0.1 * failed as f64).max(0.1)
}

pub fn recommendations(grade: SafetyGrade, factors: &[RiskFactor]) -> Vec<String> {
    let mut out = vec![
        match grade {
            SafetyGrade::A => "Proceed: no material risk detected.",
            SafetyGrade::B => "Proceed: minor risk indicators present.",
            SafetyGrade::C => "Review carefully before proceeding.",
            SafetyGrade::D => "Not recommended: significant risk indicators.",
            SafetyGrade::F => "Do not proceed: critical risk detected.",
        }
        .to_string(),
    ];
    out.extend(
        factors
            .iter()
            .filter(|f| f.contribution() >= CRITICAL_CONTRIBUTION)
            .map(|f| format!("Investigate {}: {}", f.factor_type, f.description)),
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_factor_list_scores_zero() {
        assert_eq!(aggregate(&[]), (0.0, SafetyGrade::A));
    }

    #[test]
    fn score_is_weighted_average_of_contributions() {
        let factors = vec![
            RiskFactor::new("a", "", 0.5, 0.8, ""),
            RiskFactor::new("b", "", -0.2, 0.2, ""),
        ];
        let (score, grade) = aggregate(&factors);
        // 100 × (0.40 − 0.04) / 1.0
        assert!((score - 36.0).abs() < 1e-9);
        assert_eq!(grade, SafetyGrade::B);
    }

    #[test]
    fn critical_factor_cannot_be_diluted() {
        let factors = vec![
            RiskFactor::new("malicious_address", "", 1.0, 1.0, ""),
            RiskFactor::new("m1", "", -1.0, 1.0, ""),
            RiskFactor::new("m2", "", -1.0, 1.0, ""),
        ];
        let (score, grade) = aggregate(&factors);
        assert_eq!(score, 100.0);
        assert_eq!(grade, SafetyGrade::F);
    }

    #[test]
    fn mitigating_only_factors_clamp_at_zero() {
        let (score, _) = aggregate(&[RiskFactor::new("verified", "", -0.5, 0.5, "")]);
        assert_eq!(score, 0.0);
    }

    #[test]
    fn confidence_degrades_on_model_failure() {
        let base = heuristic_confidence(2);
        assert!((base - 0.7).abs() < 1e-9);
        assert!(model_adjusted_confidence(base, 0, 1) < base);
        assert!(model_adjusted_confidence(base, 1, 0) > base);
    }
}
