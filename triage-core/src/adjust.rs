//! Contextual safety overrides on top of any scorer's probability
//!
//! These are deterministic, clinically motivated policies, not learned
//! effects. They apply identically whether the base probability came from
//! the heuristic scorer or a trained classifier, and every applied delta
//! is recorded as a factor.

use crate::band::BandThresholds;
use crate::factors::RiskFactor;
use crate::features::FeatureRow;
use crate::heuristic::{MAX_PROBABILITY, MIN_PROBABILITY};

const CRITICAL_FLOOR: f64 = 0.45;
const DISCHARGED_MAX_REDUCTION: f64 = 0.10;
const DISCHARGED_RELATIVE_REDUCTION: f64 = 0.40;
const EXTENDED_STAY_BUMP: f64 = 0.03;
const PROLONGED_STAY_BUMP: f64 = 0.05;
const SERIOUS_CONDITION_CAP: f64 = 0.12;
const SERIOUS_CONDITION_DIVISOR: f64 = 300.0;
const HIGH_RISK_HISTORY_BUMP: f64 = 0.07;
const HIGH_RISK_PRESCRIPTION_BUMP: f64 = 0.05;
const HIGH_RISK_ALLERGY_BUMP: f64 = 0.04;
const POLYPHARMACY_BUMP: f64 = 0.03;

/// Probability after overrides, with the deltas that produced it.
#[derive(Debug, Clone)]
pub struct AdjustedScore {
    pub probability: f64,
    pub factors: Vec<RiskFactor>,
}

/// Apply the override policies in a fixed order and clamp the result.
pub fn apply_context_overrides(
    probability: f64,
    row: &FeatureRow,
    thresholds: &BandThresholds,
) -> AdjustedScore {
    let mut prob = probability;
    let mut factors = Vec::new();

    // A critical patient can never sit below the critical floor,
    // whatever the model thinks.
    if row.is_critical() && prob < CRITICAL_FLOOR {
        let delta = CRITICAL_FLOOR - prob;
        prob = CRITICAL_FLOOR;
        factors.push(RiskFactor::new("status=critical", delta));
    }

    if row.is_discharged() {
        let reduction = DISCHARGED_MAX_REDUCTION.min(prob * DISCHARGED_RELATIVE_REDUCTION);
        prob -= reduction;
        factors.push(RiskFactor::new("status=discharged", -reduction));
    }

    if let Some(raw_days) = row.raw_days_since_admission {
        if raw_days >= 60.0 {
            prob += EXTENDED_STAY_BUMP;
            factors.push(RiskFactor::new("extended_stay>=60d", EXTENDED_STAY_BUMP));
        }
        if raw_days >= 180.0 {
            prob += PROLONGED_STAY_BUMP;
            factors.push(RiskFactor::new("prolonged_stay>=180d", PROLONGED_STAY_BUMP));
        }
    }

    if row.serious_condition_score > 0.0 {
        let bump = SERIOUS_CONDITION_CAP.min(row.serious_condition_score / SERIOUS_CONDITION_DIVISOR);
        prob += bump;
        factors.push(RiskFactor::new("serious_conditions", bump));
    }

    if row.high_risk_history_count >= 1.0 {
        prob += HIGH_RISK_HISTORY_BUMP;
        factors.push(RiskFactor::new("high_risk_history", HIGH_RISK_HISTORY_BUMP));
    }
    if row.high_risk_prescription_count >= 1.0 {
        prob += HIGH_RISK_PRESCRIPTION_BUMP;
        factors.push(RiskFactor::new(
            "high_risk_prescriptions",
            HIGH_RISK_PRESCRIPTION_BUMP,
        ));
    }
    if row.high_risk_allergy_count >= 1.0 {
        prob += HIGH_RISK_ALLERGY_BUMP;
        factors.push(RiskFactor::new("high_risk_allergies", HIGH_RISK_ALLERGY_BUMP));
    }
    if row.current_prescription_count >= 3.0 {
        prob += POLYPHARMACY_BUMP;
        factors.push(RiskFactor::new("prescriptions>=3", POLYPHARMACY_BUMP));
    }

    // Policy floor for extreme age: uses the effective high-band
    // threshold and only ever raises the probability.
    if let Some(raw_age) = row.raw_age_years {
        let high = thresholds.effective_high();
        let floor = if raw_age >= 110.0 {
            Some((high + 0.02).min(MAX_PROBABILITY))
        } else if raw_age >= 100.0 {
            Some(high)
        } else {
            None
        };
        if let Some(floor) = floor {
            if prob < floor {
                let delta = floor - prob;
                prob = floor;
                factors.push(RiskFactor::new("age_policy_floor", delta));
            }
        }
    }

    AdjustedScore {
        probability: prob.clamp(MIN_PROBABILITY, MAX_PROBABILITY),
        factors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factors::Direction;

    fn row() -> FeatureRow {
        FeatureRow::default()
    }

    #[test]
    fn test_no_signals_no_change() {
        let adjusted = apply_context_overrides(0.20, &row(), &BandThresholds::default());
        assert_eq!(adjusted.probability, 0.20);
        assert!(adjusted.factors.is_empty());
    }

    #[test]
    fn test_critical_floor_raises_to_exactly_045() {
        let mut r = row();
        r.status = "critical".to_string();
        let adjusted = apply_context_overrides(0.10, &r, &BandThresholds::default());
        assert_eq!(adjusted.probability, 0.45);
        assert_eq!(adjusted.factors[0].feature, "status=critical");
        assert_eq!(adjusted.factors[0].contribution, 0.35);
    }

    #[test]
    fn test_critical_above_floor_untouched() {
        let mut r = row();
        r.status = "critical".to_string();
        let adjusted = apply_context_overrides(0.60, &r, &BandThresholds::default());
        assert_eq!(adjusted.probability, 0.60);
        assert!(adjusted.factors.is_empty());
    }

    #[test]
    fn test_discharged_reduction_is_bounded() {
        let mut r = row();
        r.status = "discharged".to_string();

        // 40% of 0.20 = 0.08, below the 0.10 cap.
        let adjusted = apply_context_overrides(0.20, &r, &BandThresholds::default());
        assert!((adjusted.probability - 0.12).abs() < 1e-12);
        assert_eq!(adjusted.factors[0].direction, Direction::Down);

        // 40% of 0.50 = 0.20, capped at 0.10.
        let adjusted = apply_context_overrides(0.50, &r, &BandThresholds::default());
        assert!((adjusted.probability - 0.40).abs() < 1e-12);
    }

    #[test]
    fn test_extended_and_prolonged_stay_stack() {
        let mut r = row();
        r.raw_days_since_admission = Some(200.0);
        let adjusted = apply_context_overrides(0.10, &r, &BandThresholds::default());
        assert!((adjusted.probability - 0.18).abs() < 1e-12);
        assert_eq!(adjusted.factors.len(), 2);
    }

    #[test]
    fn test_clamped_stay_view_does_not_trigger_override() {
        // Clamped days maxes out at 30; the override must read the raw value.
        let mut r = row();
        r.days_since_admission = 30.0;
        r.raw_days_since_admission = Some(30.0);
        let adjusted = apply_context_overrides(0.10, &r, &BandThresholds::default());
        assert_eq!(adjusted.probability, 0.10);
    }

    #[test]
    fn test_serious_condition_contribution_is_capped() {
        let mut r = row();
        r.serious_condition_score = 30.0;
        let adjusted = apply_context_overrides(0.10, &r, &BandThresholds::default());
        assert!((adjusted.probability - 0.20).abs() < 1e-12);

        r.serious_condition_score = 900.0;
        let adjusted = apply_context_overrides(0.10, &r, &BandThresholds::default());
        assert!((adjusted.probability - 0.22).abs() < 1e-12);
    }

    #[test]
    fn test_high_risk_counts_add_fixed_bumps() {
        let mut r = row();
        r.high_risk_history_count = 1.0;
        r.high_risk_prescription_count = 2.0;
        r.high_risk_allergy_count = 1.0;
        r.current_prescription_count = 3.0;
        let adjusted = apply_context_overrides(0.10, &r, &BandThresholds::default());
        assert!((adjusted.probability - 0.29).abs() < 1e-12);
        assert_eq!(adjusted.factors.len(), 4);
    }

    #[test]
    fn test_age_110_floor_is_high_plus_002() {
        let mut r = row();
        r.raw_age_years = Some(115.0);
        let adjusted = apply_context_overrides(0.12, &r, &BandThresholds::default());
        assert!((adjusted.probability - 0.37).abs() < 1e-12);
        assert_eq!(adjusted.factors[0].feature, "age_policy_floor");
    }

    #[test]
    fn test_age_100s_floor_is_high_threshold() {
        let mut r = row();
        r.raw_age_years = Some(104.0);
        let adjusted = apply_context_overrides(0.12, &r, &BandThresholds::default());
        assert!((adjusted.probability - 0.35).abs() < 1e-12);
    }

    #[test]
    fn test_age_floor_only_raises() {
        let mut r = row();
        r.raw_age_years = Some(115.0);
        let adjusted = apply_context_overrides(0.80, &r, &BandThresholds::default());
        assert_eq!(adjusted.probability, 0.80);
        assert!(adjusted.factors.is_empty());
    }

    #[test]
    fn test_age_floor_uses_artifact_high_threshold() {
        let mut r = row();
        r.raw_age_years = Some(115.0);
        let thresholds = BandThresholds {
            medium: 0.10,
            high: 0.20,
        };
        let adjusted = apply_context_overrides(0.05, &r, &thresholds);
        assert!((adjusted.probability - 0.22).abs() < 1e-12);
    }

    #[test]
    fn test_result_is_clamped_to_bounds() {
        let mut r = row();
        r.status = "critical".to_string();
        r.serious_condition_score = 900.0;
        r.high_risk_history_count = 1.0;
        r.high_risk_prescription_count = 1.0;
        r.high_risk_allergy_count = 1.0;
        r.current_prescription_count = 5.0;
        r.raw_days_since_admission = Some(365.0);
        let adjusted = apply_context_overrides(0.90, &r, &BandThresholds::default());
        assert_eq!(adjusted.probability, MAX_PROBABILITY);
    }
}
