//! Operational seriousness (urgency) scoring
//!
//! Maps the adjusted probability, band, and raw feature values to a 0-100
//! urgency score with a qualitative level and a recommended response-time
//! tier. The final reported probability and band are re-derived from the
//! seriousness score so the three outputs can never disagree.

use crate::band::RiskBand;
use crate::factors::round4;
use crate::features::FeatureRow;
use crate::heuristic::{MAX_PROBABILITY, MIN_PROBABILITY};
use serde::{Deserialize, Serialize};

const PROBABILITY_WEIGHT: f64 = 55.0;
const SEVERE_FLOOR: f64 = 38.0;
const MODERATE_FLOOR: f64 = 28.0;
const MILD_FLOOR: f64 = 18.0;
const HIGH_BAND_FLOOR: f64 = 52.0;
const MEDIUM_BAND_FLOOR: f64 = 32.0;
const CONTEXT_MIN: f64 = -12.0;
const CONTEXT_MAX: f64 = 18.0;

const CRITICAL_LEVEL_THRESHOLD: f64 = 70.0;
const HIGH_LEVEL_THRESHOLD: f64 = 52.0;
const MODERATE_LEVEL_THRESHOLD: f64 = 28.0;

/// Qualitative urgency level with a fixed response-time tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriousnessLevel {
    Low,
    Moderate,
    High,
    Critical,
}

impl SeriousnessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeriousnessLevel::Low => "low",
            SeriousnessLevel::Moderate => "moderate",
            SeriousnessLevel::High => "high",
            SeriousnessLevel::Critical => "critical",
        }
    }

    pub fn recommendation(&self) -> &'static str {
        match self {
            SeriousnessLevel::Critical => "Immediate bedside assessment, within 15 minutes",
            SeriousnessLevel::High => "Urgent clinician assessment, within 30 minutes",
            SeriousnessLevel::Moderate => "Priority reassessment and monitoring, within 4 hours",
            SeriousnessLevel::Low => "Routine monitoring; reassess on any status change",
        }
    }

    /// Band consistent with this level for caller-facing output.
    pub fn consistent_band(&self) -> RiskBand {
        match self {
            SeriousnessLevel::Critical | SeriousnessLevel::High => RiskBand::High,
            SeriousnessLevel::Moderate => RiskBand::Medium,
            SeriousnessLevel::Low => RiskBand::Low,
        }
    }
}

/// Complete urgency assessment for one scoring call.
#[derive(Debug, Clone)]
pub struct SeriousnessAssessment {
    pub score: f64,
    pub level: SeriousnessLevel,
    /// Probability re-derived from the score, clamped to [0.01, 0.95].
    pub probability: f64,
    /// Band re-derived from the level.
    pub band: RiskBand,
}

/// Assess seriousness from the adjusted probability, its band, and the
/// raw feature values.
pub fn assess(probability: f64, band: RiskBand, row: &FeatureRow) -> SeriousnessAssessment {
    let base = probability * PROBABILITY_WEIGHT;

    let mut score = base.max(clinical_floor(row));
    score += context_adjustment(row);

    match band {
        RiskBand::High => score = score.max(HIGH_BAND_FLOOR),
        RiskBand::Medium => score = score.max(MEDIUM_BAND_FLOOR),
        RiskBand::Low => {}
    }

    let score = ((score.clamp(0.0, 100.0)) * 100.0).round() / 100.0;
    let level = level_for(score);

    SeriousnessAssessment {
        score,
        level,
        probability: round4((score / 100.0).clamp(MIN_PROBABILITY, MAX_PROBABILITY)),
        band: level.consistent_band(),
    }
}

/// Tiered clinical floor from severity signals. Later tiers are strict
/// subsets of earlier ones, so the floor is monotone in each signal.
fn clinical_floor(row: &FeatureRow) -> f64 {
    if row.serious_condition_score >= 60.0 || row.high_risk_history_count >= 2.0 {
        SEVERE_FLOOR
    } else if row.serious_condition_score >= 30.0
        || row.high_risk_history_count >= 1.0
        || row.high_risk_prescription_count >= 2.0
    {
        MODERATE_FLOOR
    } else if row.serious_condition_score >= 10.0
        || row.high_risk_prescription_count >= 1.0
        || row.high_risk_allergy_count >= 1.0
    {
        MILD_FLOOR
    } else {
        0.0
    }
}

/// Bounded context adjustment from status, age, stay, and list counts.
fn context_adjustment(row: &FeatureRow) -> f64 {
    let mut adjustment: f64 = 0.0;
    if row.is_critical() {
        adjustment += 8.0;
    }
    if row.is_discharged() {
        adjustment -= 6.0;
    }

    let age = row.raw_age_years.unwrap_or(row.age_years);
    if age >= 85.0 {
        adjustment += 4.0;
    } else if age >= 75.0 {
        adjustment += 2.0;
    }

    let days = row.raw_days_since_admission.unwrap_or(row.days_since_admission);
    if days >= 30.0 {
        adjustment += 3.0;
    } else if days >= 14.0 {
        adjustment += 2.0;
    }

    if row.history_count >= 6.0 {
        adjustment += 3.0;
    } else if row.history_count >= 4.0 {
        adjustment += 2.0;
    }
    if row.allergy_count >= 3.0 {
        adjustment += 2.0;
    }
    if row.current_prescription_count >= 5.0 {
        adjustment += 2.0;
    }
    if row.medication_count == 0.0 {
        adjustment -= 2.0;
    }

    adjustment.clamp(CONTEXT_MIN, CONTEXT_MAX)
}

fn level_for(score: f64) -> SeriousnessLevel {
    if score >= CRITICAL_LEVEL_THRESHOLD {
        SeriousnessLevel::Critical
    } else if score >= HIGH_LEVEL_THRESHOLD {
        SeriousnessLevel::High
    } else if score >= MODERATE_LEVEL_THRESHOLD {
        SeriousnessLevel::Moderate
    } else {
        SeriousnessLevel::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> FeatureRow {
        FeatureRow {
            medication_count: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_score_within_bounds() {
        for prob in [0.01, 0.2, 0.5, 0.95] {
            for band in [RiskBand::Low, RiskBand::Medium, RiskBand::High] {
                let assessment = assess(prob, band, &row());
                assert!((0.0..=100.0).contains(&assessment.score));
            }
        }
    }

    #[test]
    fn test_probability_rederived_from_score() {
        let assessment = assess(0.5, RiskBand::High, &row());
        assert_eq!(
            assessment.probability,
            round4((assessment.score / 100.0).clamp(0.01, 0.95))
        );
    }

    #[test]
    fn test_band_consistent_with_level() {
        let assessment = assess(0.9, RiskBand::High, &row());
        assert_eq!(assessment.band, assessment.level.consistent_band());
    }

    #[test]
    fn test_low_scenario() {
        // Heuristic 0.04 case: no medications, nothing else elevated.
        let mut r = row();
        r.medication_count = 0.0;
        r.raw_days_since_admission = Some(1.0);
        r.days_since_admission = 1.0;
        r.age_years = 30.0;
        r.raw_age_years = Some(30.0);
        let assessment = assess(0.04, RiskBand::Low, &r);
        assert_eq!(assessment.level, SeriousnessLevel::Low);
        assert_eq!(
            assessment.level.recommendation(),
            "Routine monitoring; reassess on any status change"
        );
        assert_eq!(assessment.band, RiskBand::Low);
    }

    #[test]
    fn test_critical_status_reaches_high_level() {
        let mut r = row();
        r.status = "critical".to_string();
        // Adjusted probability for a minimal critical patient is 0.45.
        let assessment = assess(0.45, RiskBand::High, &r);
        assert!(assessment.score >= HIGH_BAND_FLOOR);
        assert!(matches!(
            assessment.level,
            SeriousnessLevel::High | SeriousnessLevel::Critical
        ));
    }

    #[test]
    fn test_high_band_floor_applies() {
        let assessment = assess(0.36, RiskBand::High, &row());
        assert!(assessment.score >= HIGH_BAND_FLOOR);
        assert_eq!(assessment.level, SeriousnessLevel::High);
    }

    #[test]
    fn test_medium_band_floor_applies() {
        let assessment = assess(0.16, RiskBand::Medium, &row());
        assert!(assessment.score >= MEDIUM_BAND_FLOOR);
        assert_eq!(assessment.level, SeriousnessLevel::Moderate);
    }

    #[test]
    fn test_clinical_floor_tiers() {
        let mut r = row();
        r.serious_condition_score = 65.0;
        assert_eq!(clinical_floor(&r), SEVERE_FLOOR);
        r.serious_condition_score = 35.0;
        assert_eq!(clinical_floor(&r), MODERATE_FLOOR);
        r.serious_condition_score = 12.0;
        assert_eq!(clinical_floor(&r), MILD_FLOOR);
        r.serious_condition_score = 0.0;
        assert_eq!(clinical_floor(&r), 0.0);

        r.high_risk_history_count = 2.0;
        assert_eq!(clinical_floor(&r), SEVERE_FLOOR);
    }

    #[test]
    fn test_monotone_in_serious_condition_score() {
        let mut previous = 0.0;
        for score in [0.0, 5.0, 10.0, 25.0, 30.0, 55.0, 60.0, 120.0, 400.0] {
            let mut r = row();
            r.serious_condition_score = score;
            let assessment = assess(0.10, RiskBand::Low, &r);
            assert!(
                assessment.score >= previous,
                "seriousness dropped from {previous} at score {score}"
            );
            previous = assessment.score;
        }
    }

    #[test]
    fn test_context_adjustment_is_bounded() {
        let r = FeatureRow {
            status: "critical".to_string(),
            raw_age_years: Some(99.0),
            raw_days_since_admission: Some(90.0),
            history_count: 9.0,
            allergy_count: 5.0,
            current_prescription_count: 7.0,
            medication_count: 3.0,
            ..Default::default()
        };
        // Raw sum is +22 here; the clamp caps it.
        assert_eq!(context_adjustment(&r), CONTEXT_MAX);

        let discharged = FeatureRow {
            status: "discharged".to_string(),
            medication_count: 0.0,
            ..Default::default()
        };
        let adjustment = context_adjustment(&discharged);
        assert_eq!(adjustment, -8.0);
        assert!(adjustment >= CONTEXT_MIN);
    }

    #[test]
    fn test_level_thresholds() {
        assert_eq!(level_for(70.0), SeriousnessLevel::Critical);
        assert_eq!(level_for(69.9), SeriousnessLevel::High);
        assert_eq!(level_for(52.0), SeriousnessLevel::High);
        assert_eq!(level_for(51.9), SeriousnessLevel::Moderate);
        assert_eq!(level_for(28.0), SeriousnessLevel::Moderate);
        assert_eq!(level_for(27.9), SeriousnessLevel::Low);
    }

    #[test]
    fn test_recommendations() {
        assert_eq!(
            SeriousnessLevel::Critical.recommendation(),
            "Immediate bedside assessment, within 15 minutes"
        );
        assert_eq!(
            SeriousnessLevel::High.recommendation(),
            "Urgent clinician assessment, within 30 minutes"
        );
        assert_eq!(
            SeriousnessLevel::Moderate.recommendation(),
            "Priority reassessment and monitoring, within 4 hours"
        );
    }
}
