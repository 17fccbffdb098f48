//! Prediction orchestration and the fallback chain
//!
//! Global invariants enforced:
//! - The scoring boundary always returns a complete prediction; there is
//!   no "unavailable" state, only a degraded heuristic mode
//! - Classifier failures of any kind degrade to heuristic scoring and are
//!   never surfaced to the caller
//! - Probability, band, and seriousness level all derive from the same
//!   underlying computation

use crate::adjust::apply_context_overrides;
use crate::artifact::{ArtifactStore, ClassifierArtifact, StoreConfig};
use crate::band::{classify, BandThresholds};
use crate::factors::{merge_factors, round4, RiskFactor};
use crate::features::FeatureRow;
use crate::heuristic::{heuristic_factors, heuristic_risk_score};
use crate::model::{intercept_factor, score_row, stored_weight_factors};
use crate::patient::PatientSnapshot;
use crate::seriousness::assess;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Version string reported when the heuristic branch scored the call.
pub const HEURISTIC_MODEL_VERSION: &str = "heuristic-v1";

/// Which scoring branch produced the base probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMode {
    Heuristic,
    Supervised,
}

impl ScoringMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoringMode::Heuristic => "heuristic",
            ScoringMode::Supervised => "supervised",
        }
    }
}

/// Base score from one of the two branches. The branches share no
/// behavior beyond this output shape, so a tagged variant fits better
/// than a scorer trait.
#[derive(Debug, Clone)]
enum ScoreResult {
    Heuristic {
        probability: f64,
        factors: Vec<RiskFactor>,
    },
    Supervised {
        probability: f64,
        factors: Vec<RiskFactor>,
        model_version: String,
        thresholds: BandThresholds,
    },
}

/// Complete, caller-facing prediction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Prediction {
    pub risk_probability: f64,
    pub risk_band: String,
    pub model_version: String,
    pub top_factors: Vec<RiskFactor>,
    pub scoring_mode: ScoringMode,
    pub seriousness_factor: f64,
    pub seriousness_level: String,
    pub assessment_recommendation: String,
}

/// Composes feature building, scoring, overrides, and assessment into
/// one `predict` call.
#[derive(Debug, Clone)]
pub struct RiskEngine {
    store: ArtifactStore,
}

impl RiskEngine {
    pub fn new(config: StoreConfig) -> Self {
        RiskEngine {
            store: ArtifactStore::new(config),
        }
    }

    /// Score a patient against "now".
    ///
    /// Total for any snapshot: a patient missing fields scores as
    /// zero/unknown rather than failing.
    pub fn predict(&self, patient: &PatientSnapshot) -> Prediction {
        self.predict_at(patient, Utc::now().date_naive())
    }

    /// Score a patient against an explicit reference date.
    pub fn predict_at(&self, patient: &PatientSnapshot, reference: NaiveDate) -> Prediction {
        let row = FeatureRow::from_patient_at(patient, reference);
        let base = self.base_score(&row);

        let (probability, base_factors, model_version, scoring_mode, thresholds) = match base {
            ScoreResult::Supervised {
                probability,
                factors,
                model_version,
                thresholds,
            } => (
                probability,
                factors,
                model_version,
                ScoringMode::Supervised,
                thresholds,
            ),
            ScoreResult::Heuristic {
                probability,
                factors,
            } => (
                probability,
                factors,
                HEURISTIC_MODEL_VERSION.to_string(),
                ScoringMode::Heuristic,
                BandThresholds::default(),
            ),
        };

        let adjusted = apply_context_overrides(probability, &row, &thresholds);
        let top_factors = merge_factors(adjusted.factors, base_factors);
        let band = classify(adjusted.probability, &thresholds);
        let assessment = assess(adjusted.probability, band, &row);

        Prediction {
            risk_probability: round4(assessment.probability),
            risk_band: assessment.band.as_str().to_string(),
            model_version,
            top_factors,
            scoring_mode,
            seriousness_factor: assessment.score,
            seriousness_level: assessment.level.as_str().to_string(),
            assessment_recommendation: assessment.level.recommendation().to_string(),
        }
    }

    /// Try the classifier branch; degrade to the heuristic branch on a
    /// store miss or any classifier error.
    fn base_score(&self, row: &FeatureRow) -> ScoreResult {
        let outcome = self.store.load_latest();
        let Some(artifact) = outcome.artifact else {
            debug!("no usable artifact, scoring heuristically");
            return heuristic_result(row);
        };

        match score_artifact(&artifact, row) {
            Ok(result) => result,
            Err(err) => {
                warn!(
                    model_version = %artifact.model_version,
                    error = %err,
                    "classifier scoring failed, falling back to heuristic"
                );
                heuristic_result(row)
            }
        }
    }
}

fn heuristic_result(row: &FeatureRow) -> ScoreResult {
    let probability = heuristic_risk_score(row);
    ScoreResult::Heuristic {
        probability,
        factors: heuristic_factors(row, probability),
    }
}

fn score_artifact(artifact: &ClassifierArtifact, row: &FeatureRow) -> anyhow::Result<ScoreResult> {
    // Confirm the serving-time schema covers the fit-time column order.
    for column in &artifact.feature_columns {
        if row.numeric_value(column).is_err() && row.categorical_value(column).is_err() {
            anyhow::bail!("artifact column '{}' is absent from the serving schema", column);
        }
    }

    let (probability, mut factors) =
        score_row(&artifact.pipeline, artifact.calibrator.as_ref(), row)?;

    if factors.is_empty() {
        factors = stored_weight_factors(&artifact.top_feature_names, &artifact.top_feature_weights);
    }
    if factors.is_empty() {
        factors = intercept_factor();
    }

    Ok(ScoreResult::Supervised {
        probability,
        factors,
        model_version: artifact.model_version.clone(),
        thresholds: BandThresholds::from_value(&artifact.band_thresholds),
    })
}
