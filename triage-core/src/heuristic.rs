//! Rule-based fallback scorer
//!
//! Global invariants enforced:
//! - Pure functions of the feature row, no I/O and no clock access
//! - Identical input yields bit-for-bit identical output
//! - Output is always within [0.01, 0.95]
//!
//! This is the system's safety net: scoring must stay available even when
//! no trained artifact exists, so nothing here may fail.

use crate::factors::{round4, RiskFactor, MAX_FACTORS};
use crate::features::FeatureRow;

const BASE_SCORE: f64 = 0.08;
const CRITICAL_STATUS_BUMP: f64 = 0.20;
const LONG_STAY_BUMP: f64 = 0.10;
const ELDERLY_BUMP: f64 = 0.08;
const HISTORY_BUMP: f64 = 0.06;
const PAST_HISTORY_BUMP: f64 = 0.04;
const NO_MEDICATION_DISCOUNT: f64 = 0.04;

pub const MIN_PROBABILITY: f64 = 0.01;
pub const MAX_PROBABILITY: f64 = 0.95;

/// Deterministic additive rule score in [0.01, 0.95].
pub fn heuristic_risk_score(row: &FeatureRow) -> f64 {
    let mut score = BASE_SCORE;
    if row.is_critical() {
        score += CRITICAL_STATUS_BUMP;
    }
    if row.days_since_admission >= 14.0 {
        score += LONG_STAY_BUMP;
    }
    if row.age_years >= 75.0 {
        score += ELDERLY_BUMP;
    }
    if row.history_count >= 4.0 {
        score += HISTORY_BUMP;
    }
    if row.past_history_count >= 2.0 {
        score += PAST_HISTORY_BUMP;
    }
    if row.medication_count == 0.0 {
        score -= NO_MEDICATION_DISCOUNT;
    }
    score.clamp(MIN_PROBABILITY, MAX_PROBABILITY)
}

/// Up to five factor entries mirroring the rules that fired.
///
/// When no rule fired a single synthetic `baseline_risk` factor carries
/// the score itself, so the explainability payload is never empty.
pub fn heuristic_factors(row: &FeatureRow, score: f64) -> Vec<RiskFactor> {
    let mut factors = Vec::new();
    if row.is_critical() {
        factors.push(RiskFactor::new("status=critical", CRITICAL_STATUS_BUMP));
    }
    if row.days_since_admission >= 14.0 {
        factors.push(RiskFactor::new("days_since_admission>=14", LONG_STAY_BUMP));
    }
    if row.age_years >= 75.0 {
        factors.push(RiskFactor::new("age>=75", ELDERLY_BUMP));
    }
    if row.history_count >= 4.0 {
        factors.push(RiskFactor::new("history_count>=4", HISTORY_BUMP));
    }
    if row.past_history_count >= 2.0 {
        factors.push(RiskFactor::new("past_history_count>=2", PAST_HISTORY_BUMP));
    }
    if row.medication_count == 0.0 {
        factors.push(RiskFactor::new("medication_count=0", -NO_MEDICATION_DISCOUNT));
    }

    if factors.is_empty() {
        factors.push(RiskFactor::new("baseline_risk", round4(score)));
    }
    factors.truncate(MAX_FACTORS);
    factors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factors::Direction;

    fn row() -> FeatureRow {
        FeatureRow {
            medication_count: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_base_score_with_one_medication() {
        assert_eq!(heuristic_risk_score(&row()), 0.08);
    }

    #[test]
    fn test_no_medication_discount() {
        let mut r = row();
        r.medication_count = 0.0;
        let score = heuristic_risk_score(&r);
        assert!((score - 0.04).abs() < 1e-12);
    }

    #[test]
    fn test_critical_status_bump() {
        let mut r = row();
        r.status = "critical".to_string();
        assert!((heuristic_risk_score(&r) - 0.28).abs() < 1e-12);
    }

    #[test]
    fn test_all_rules_fire_and_clamp_holds() {
        let r = FeatureRow {
            status: "critical".to_string(),
            days_since_admission: 20.0,
            age_years: 80.0,
            history_count: 5.0,
            past_history_count: 3.0,
            medication_count: 0.0,
            ..Default::default()
        };
        let score = heuristic_risk_score(&r);
        assert!((score - 0.52).abs() < 1e-12);
        assert!((MIN_PROBABILITY..=MAX_PROBABILITY).contains(&score));
    }

    #[test]
    fn test_determinism() {
        let r = FeatureRow {
            status: "critical".to_string(),
            age_years: 91.0,
            history_count: 4.0,
            medication_count: 2.0,
            ..Default::default()
        };
        assert_eq!(heuristic_risk_score(&r), heuristic_risk_score(&r));
    }

    #[test]
    fn test_factors_mirror_fired_rules() {
        let r = FeatureRow {
            status: "critical".to_string(),
            age_years: 80.0,
            medication_count: 0.0,
            ..Default::default()
        };
        let score = heuristic_risk_score(&r);
        let factors = heuristic_factors(&r, score);
        assert_eq!(factors.len(), 3);
        assert_eq!(factors[0].feature, "status=critical");
        assert_eq!(factors[0].contribution, 0.20);
        assert_eq!(factors[2].feature, "medication_count=0");
        assert_eq!(factors[2].direction, Direction::Down);
        assert_eq!(factors[2].contribution, -0.04);
    }

    #[test]
    fn test_baseline_factor_when_nothing_fired() {
        let r = row();
        let score = heuristic_risk_score(&r);
        let factors = heuristic_factors(&r, score);
        assert_eq!(factors.len(), 1);
        assert_eq!(factors[0].feature, "baseline_risk");
        assert_eq!(factors[0].contribution, round4(score));
    }

    #[test]
    fn test_factors_capped_at_five() {
        let r = FeatureRow {
            status: "critical".to_string(),
            days_since_admission: 14.0,
            age_years: 75.0,
            history_count: 4.0,
            past_history_count: 2.0,
            medication_count: 0.0,
            ..Default::default()
        };
        assert_eq!(heuristic_factors(&r, heuristic_risk_score(&r)).len(), 5);
    }
}
