//! Fitted classifier pipeline and per-call scoring
//!
//! A pipeline standardizes the numeric columns, one-hot encodes the
//! categorical column, and feeds a regularized logistic model. The exact
//! column order recorded at fit time is authoritative: a feature row that
//! cannot be reshaped to it is a schema mismatch and the error propagates
//! to the orchestrator, which falls back to the heuristic scorer.

use crate::factors::{RiskFactor, CONTRIBUTION_EPSILON, MAX_FACTORS};
use crate::features::FeatureRow;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Friendly names for raw feature columns in explainability output.
const FEATURE_ALIASES: [(&str, &str); 3] = [
    ("age_years", "age"),
    ("days_since_admission", "length_of_stay"),
    ("serious_condition_score", "condition_severity"),
];

/// Standard scaler parameters for one numeric column.
///
/// A zero standard deviation (constant column at fit time) transforms to
/// zero so degenerate columns cannot blow up the decision function.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ColumnScaler {
    pub mean: f64,
    pub std: f64,
}

impl ColumnScaler {
    pub fn transform(&self, value: f64) -> f64 {
        if self.std == 0.0 {
            0.0
        } else {
            (value - self.mean) / self.std
        }
    }
}

/// Fitted transform + linear model bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Pipeline {
    pub numeric_columns: Vec<String>,
    pub numeric_scalers: Vec<ColumnScaler>,
    pub categorical_column: String,
    /// One-hot categories in fit order; unseen values encode as all zeros.
    pub categories: Vec<String>,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

impl Pipeline {
    /// Transformed feature names in coefficient order, using the same
    /// `num__` / `cat__` prefixes the artifact explainability relies on.
    pub fn transformed_feature_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .numeric_columns
            .iter()
            .map(|c| format!("num__{c}"))
            .collect();
        for category in &self.categories {
            names.push(format!("cat__{}_{}", self.categorical_column, category));
        }
        names
    }

    /// Reshape one feature row into the transformed vector.
    pub fn transform_row(&self, row: &FeatureRow) -> Result<Vec<f64>> {
        if self.numeric_columns.len() != self.numeric_scalers.len() {
            anyhow::bail!(
                "pipeline scaler count {} does not match numeric column count {}",
                self.numeric_scalers.len(),
                self.numeric_columns.len()
            );
        }
        let mut transformed = Vec::with_capacity(self.numeric_columns.len() + self.categories.len());
        for (column, scaler) in self.numeric_columns.iter().zip(&self.numeric_scalers) {
            let value = row
                .numeric_value(column)
                .context("reshaping row to fit-time column order")?;
            transformed.push(scaler.transform(value));
        }
        let observed = row.categorical_value(&self.categorical_column)?;
        for category in &self.categories {
            transformed.push(if observed == category { 1.0 } else { 0.0 });
        }
        Ok(transformed)
    }

    /// Linear decision value for a transformed vector.
    pub fn decision(&self, transformed: &[f64]) -> Result<f64> {
        if transformed.len() != self.coefficients.len() {
            anyhow::bail!(
                "transformed width {} does not match coefficient count {}",
                transformed.len(),
                self.coefficients.len()
            );
        }
        let dot: f64 = transformed
            .iter()
            .zip(&self.coefficients)
            .map(|(x, w)| x * w)
            .sum();
        Ok(dot + self.intercept)
    }

    /// Positive-class probability for one feature row.
    pub fn predict_proba(&self, row: &FeatureRow) -> Result<f64> {
        let transformed = self.transform_row(row)?;
        Ok(sigmoid(self.decision(&transformed)?))
    }
}

/// Platt calibrator mapping a decision value to a calibrated probability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PlattCalibrator {
    pub a: f64,
    pub b: f64,
}

impl PlattCalibrator {
    pub fn calibrate(&self, decision: f64) -> f64 {
        sigmoid(self.a * decision + self.b)
    }
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Score one feature row with a loaded artifact's pipeline and calibrator.
///
/// Returns the clamped probability and up to five ranked factor
/// contributions. Any error here means the artifact cannot score this row
/// and the caller falls back to the heuristic scorer.
pub fn score_row(
    pipeline: &Pipeline,
    calibrator: Option<&PlattCalibrator>,
    row: &FeatureRow,
) -> Result<(f64, Vec<RiskFactor>)> {
    let transformed = pipeline.transform_row(row)?;
    let decision = pipeline.decision(&transformed)?;
    let probability = match calibrator {
        Some(cal) => cal.calibrate(decision),
        None => sigmoid(decision),
    };
    if !probability.is_finite() {
        anyhow::bail!("classifier produced a non-finite probability");
    }
    let probability = probability.clamp(0.0, 1.0);
    let factors = coefficient_factors(pipeline, &transformed);
    Ok((probability, factors))
}

/// Per-row contributions as transformed value times coefficient.
fn coefficient_factors(pipeline: &Pipeline, transformed: &[f64]) -> Vec<RiskFactor> {
    let names = pipeline.transformed_feature_names();
    let mut contributions: Vec<(String, f64)> = names
        .iter()
        .zip(transformed.iter().zip(&pipeline.coefficients))
        .map(|(name, (x, w))| (name.clone(), x * w))
        .filter(|(_, c)| c.abs() >= CONTRIBUTION_EPSILON)
        .collect();
    contributions.sort_by(|a, b| {
        b.1.abs()
            .partial_cmp(&a.1.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    contributions
        .into_iter()
        .take(MAX_FACTORS)
        .map(|(name, c)| RiskFactor::new(humanize_feature_name(&name), c))
        .collect()
}

/// Factors from the artifact's stored fit-time weights, used when live
/// coefficient extraction produced nothing (legacy artifact formats).
pub fn stored_weight_factors(names: &[String], weights: &[f64]) -> Vec<RiskFactor> {
    names
        .iter()
        .take(MAX_FACTORS)
        .enumerate()
        .map(|(idx, name)| {
            let weight = weights.get(idx).copied().unwrap_or(0.0);
            RiskFactor::new(humanize_feature_name(name), weight)
        })
        .collect()
}

/// Last-resort factor so the explainability payload is never empty.
pub fn intercept_factor() -> Vec<RiskFactor> {
    vec![RiskFactor::new("model_intercept", 0.0)]
}

/// Strip transform prefixes and render one-hot names as `field=value`.
pub fn humanize_feature_name(name: &str) -> String {
    if let Some(raw) = name.strip_prefix("num__") {
        return alias(raw).to_string();
    }
    if let Some(raw) = name.strip_prefix("cat__") {
        if let Some((field, value)) = raw.split_once('_') {
            return format!("{field}={value}");
        }
        return raw.to_string();
    }
    alias(name).to_string()
}

fn alias(raw: &str) -> &str {
    FEATURE_ALIASES
        .iter()
        .find(|(name, _)| *name == raw)
        .map(|(_, friendly)| *friendly)
        .unwrap_or(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FEATURE_NUMERIC_COLUMNS;

    fn tiny_pipeline() -> Pipeline {
        Pipeline {
            numeric_columns: vec!["age_years".to_string(), "history_count".to_string()],
            numeric_scalers: vec![
                ColumnScaler {
                    mean: 50.0,
                    std: 10.0,
                },
                ColumnScaler {
                    mean: 2.0,
                    std: 1.0,
                },
            ],
            categorical_column: "gender".to_string(),
            categories: vec!["female".to_string(), "male".to_string()],
            coefficients: vec![0.8, 0.5, -0.1, 0.1],
            intercept: -1.0,
        }
    }

    fn row(age: f64, history: f64, gender: &str) -> FeatureRow {
        FeatureRow {
            age_years: age,
            history_count: history,
            gender: gender.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_transform_row_scales_and_encodes() {
        let pipeline = tiny_pipeline();
        let transformed = pipeline.transform_row(&row(60.0, 3.0, "male")).unwrap();
        assert_eq!(transformed, vec![1.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_unseen_category_encodes_all_zeros() {
        let pipeline = tiny_pipeline();
        let transformed = pipeline.transform_row(&row(50.0, 2.0, "unknown")).unwrap();
        assert_eq!(&transformed[2..], &[0.0, 0.0]);
    }

    #[test]
    fn test_zero_std_scaler_transforms_to_zero() {
        let scaler = ColumnScaler {
            mean: 4.0,
            std: 0.0,
        };
        assert_eq!(scaler.transform(123.0), 0.0);
    }

    #[test]
    fn test_unknown_column_is_schema_mismatch() {
        let mut pipeline = tiny_pipeline();
        pipeline.numeric_columns[0] = "not_a_feature".to_string();
        assert!(pipeline.transform_row(&row(60.0, 3.0, "male")).is_err());
    }

    #[test]
    fn test_coefficient_width_mismatch_errors() {
        let mut pipeline = tiny_pipeline();
        pipeline.coefficients.pop();
        assert!(pipeline.predict_proba(&row(60.0, 3.0, "male")).is_err());
    }

    #[test]
    fn test_predict_proba_in_unit_interval() {
        let pipeline = tiny_pipeline();
        for age in [0.0, 30.0, 110.0] {
            let p = pipeline.predict_proba(&row(age, 5.0, "female")).unwrap();
            assert!((0.0..=1.0).contains(&p));
        }
    }

    #[test]
    fn test_calibrator_overrides_raw_probability() {
        let pipeline = tiny_pipeline();
        let calibrator = PlattCalibrator { a: 0.0, b: 0.0 };
        let (p, _) = score_row(&pipeline, Some(&calibrator), &row(60.0, 3.0, "male")).unwrap();
        assert!((p - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_factor_extraction_ranks_by_magnitude() {
        let pipeline = tiny_pipeline();
        let (_, factors) = score_row(&pipeline, None, &row(60.0, 3.0, "male")).unwrap();
        assert!(!factors.is_empty());
        assert_eq!(factors[0].feature, "age");
        for pair in factors.windows(2) {
            assert!(pair[0].contribution.abs() >= pair[1].contribution.abs());
        }
    }

    #[test]
    fn test_factor_extraction_skips_zero_contributions() {
        let pipeline = tiny_pipeline();
        // Mean-valued numerics and an unseen gender contribute nothing.
        let (_, factors) = score_row(&pipeline, None, &row(50.0, 2.0, "unknown")).unwrap();
        assert!(factors.is_empty());
    }

    #[test]
    fn test_humanize_strips_prefixes_and_aliases() {
        assert_eq!(humanize_feature_name("num__age_years"), "age");
        assert_eq!(
            humanize_feature_name("num__days_since_admission"),
            "length_of_stay"
        );
        assert_eq!(humanize_feature_name("num__history_count"), "history_count");
        assert_eq!(humanize_feature_name("cat__gender_male"), "gender=male");
        assert_eq!(humanize_feature_name("plain"), "plain");
    }

    #[test]
    fn test_stored_weight_factors_fallback() {
        let names = vec!["num__age_years".to_string(), "cat__gender_male".to_string()];
        let weights = vec![0.4, -0.2];
        let factors = stored_weight_factors(&names, &weights);
        assert_eq!(factors.len(), 2);
        assert_eq!(factors[0].feature, "age");
        assert_eq!(factors[1].feature, "gender=male");
        assert_eq!(factors[1].contribution, -0.2);
    }

    #[test]
    fn test_intercept_factor_is_single_zero_entry() {
        let factors = intercept_factor();
        assert_eq!(factors.len(), 1);
        assert_eq!(factors[0].feature, "model_intercept");
        assert_eq!(factors[0].contribution, 0.0);
    }

    #[test]
    fn test_transformed_names_cover_full_schema() {
        let pipeline = Pipeline {
            numeric_columns: FEATURE_NUMERIC_COLUMNS.iter().map(|c| c.to_string()).collect(),
            numeric_scalers: vec![ColumnScaler { mean: 0.0, std: 1.0 }; 11],
            categorical_column: "gender".to_string(),
            categories: vec!["female".to_string()],
            coefficients: vec![0.0; 12],
            intercept: 0.0,
        };
        let names = pipeline.transformed_feature_names();
        assert_eq!(names.len(), 12);
        assert_eq!(names[0], "num__age_years");
        assert_eq!(names[11], "cat__gender_female");
    }
}
