//! Offline training from readmission CSV extracts
//!
//! Global invariants enforced:
//! - Training never touches the serving path; its only output is a new
//!   immutable artifact file
//! - The fitted column order is the shared serving schema, so a trained
//!   artifact always scores a live feature row
//! - The same CSV, options, and seed produce the same fitted model

use crate::artifact::{persist_artifact, ClassifierArtifact, ARTIFACT_SCHEMA_VERSION};
use crate::features::{feature_column_order, FeatureRow, FEATURE_NUMERIC_COLUMNS};
use crate::model::{sigmoid, ColumnScaler, Pipeline, PlattCalibrator};
use anyhow::{Context, Result};
use chrono::Utc;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

const EPOCHS: usize = 300;
const LEARNING_RATE: f64 = 0.1;
const L2_LAMBDA: f64 = 0.01;
const TOP_FEATURE_LIMIT: usize = 12;
const SANITY_CHECK_ROWS: usize = 8;

/// Diagnostics only run when the data can support a stable holdout.
const DIAGNOSTICS_MIN_POSITIVES: usize = 10;
const DIAGNOSTICS_MIN_NEGATIVES: usize = 10;
const DIAGNOSTICS_MIN_ROWS: usize = 200;
const HOLDOUT_FRACTION: f64 = 0.2;

const THRESHOLD_MEDIUM_MIN: f64 = 0.08;
const THRESHOLD_MEDIUM_MAX: f64 = 0.20;
const THRESHOLD_HIGH_CAP: f64 = 0.35;
const THRESHOLD_BAND_GAP: f64 = 0.05;

/// Trainer settings; every knob has a safe default.
#[derive(Debug, Clone)]
pub struct TrainingOptions {
    pub csv_path: PathBuf,
    pub output_dir: PathBuf,
    /// Reject datasets below this row count.
    pub min_rows: usize,
    /// Reject datasets below this positive-label count.
    pub min_positives: usize,
    /// Subsample large extracts down to this many rows.
    pub max_rows: Option<usize>,
    pub seed: u64,
}

impl TrainingOptions {
    pub fn new(csv_path: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        TrainingOptions {
            csv_path: csv_path.into(),
            output_dir: output_dir.into(),
            min_rows: 25,
            min_positives: 5,
            max_rows: Some(50_000),
            seed: 42,
        }
    }
}

/// Summary of one completed training run.
#[derive(Debug, Clone)]
pub struct TrainingResult {
    pub model_version: String,
    pub artifact_path: PathBuf,
    pub rows: usize,
    pub positives: usize,
    pub metrics: BTreeMap<String, f64>,
}

struct LabeledRow {
    features: FeatureRow,
    label: bool,
}

/// Train a classifier from a CSV extract and persist the artifact.
pub fn train_and_save(options: &TrainingOptions) -> Result<TrainingResult> {
    let mut rows = load_training_csv(&options.csv_path)?;

    if let Some(max_rows) = options.max_rows {
        if rows.len() > max_rows {
            subsample(&mut rows, max_rows, options.seed);
        }
    }

    let positives = rows.iter().filter(|r| r.label).count();
    validate_dataset(&rows, positives, options)?;

    let base_rate = positives as f64 / rows.len() as f64;
    info!(
        rows = rows.len(),
        positives,
        base_rate,
        "fitting classifier"
    );

    let mut metrics = diagnostics(&rows, options.seed);
    let pipeline = fit_pipeline(&rows)?;
    sanity_check(&pipeline, &rows)?;

    let calibrator = fit_calibrator(&pipeline, &rows)?;

    metrics.insert("rows".to_string(), rows.len() as f64);
    metrics.insert("positives".to_string(), positives as f64);

    let (names, weights) = top_coefficients(&pipeline);
    let model_version = format!("risk-v1-{}", Utc::now().format("%Y%m%d%H%M%S"));
    let artifact = ClassifierArtifact {
        schema_version: ARTIFACT_SCHEMA_VERSION,
        model_version: model_version.clone(),
        pipeline,
        calibrator,
        feature_columns: feature_column_order(),
        band_thresholds: band_thresholds_for(base_rate),
        top_feature_names: names,
        top_feature_weights: weights,
        training_metrics: metrics.clone(),
        base_rate,
    };

    let artifact_path = persist_artifact(&options.output_dir, &artifact)?;
    info!(version = %model_version, path = %artifact_path.display(), "persisted artifact");

    Ok(TrainingResult {
        model_version,
        artifact_path,
        rows: rows.len(),
        positives,
        metrics,
    })
}

/// Midpoint of a `[lo-hi)` age bracket; unparsable brackets fall back to
/// the population-typical 45.
pub fn age_bracket_midpoint(bracket: &str) -> f64 {
    let re = match Regex::new(r"^\[(\d+)-(\d+)\)$") {
        Ok(re) => re,
        Err(_) => return 45.0,
    };
    let Some(caps) = re.captures(bracket.trim()) else {
        return 45.0;
    };
    let lo: f64 = caps
        .get(1)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(45.0);
    let hi: f64 = caps
        .get(2)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(lo);
    (lo + hi) / 2.0
}

fn load_training_csv(path: &Path) -> Result<Vec<LabeledRow>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open training CSV: {}", path.display()))?;
    let headers = reader
        .headers()
        .context("failed to read CSV headers")?
        .clone();

    let column = |name: &str| -> Result<usize> {
        headers
            .iter()
            .position(|h| h == name)
            .with_context(|| format!("training CSV is missing required column '{name}'"))
    };

    let age_idx = column("age")?;
    let stay_idx = column("time_in_hospital")?;
    let meds_idx = column("num_medications")?;
    let diagnoses_idx = column("number_diagnoses")?;
    let inpatient_idx = column("number_inpatient")?;
    let outpatient_idx = column("number_outpatient")?;
    let emergency_idx = column("number_emergency")?;
    let gender_idx = column("gender")?;
    let label_idx = column("readmitted")?;

    let numeric = |record: &csv::StringRecord, idx: usize| -> f64 {
        record
            .get(idx)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .unwrap_or(0.0)
    };

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record =
            record.with_context(|| format!("failed to read CSV record at line {}", line + 2))?;

        let age_years = age_bracket_midpoint(record.get(age_idx).unwrap_or(""));
        let prior_encounters = numeric(&record, inpatient_idx)
            + numeric(&record, outpatient_idx)
            + numeric(&record, emergency_idx);

        let gender = match record.get(gender_idx).map(str::trim) {
            Some(g) if g.eq_ignore_ascii_case("male") => "male",
            Some(g) if g.eq_ignore_ascii_case("female") => "female",
            _ => "unknown",
        };

        // The extract carries no free-text lists, so the keyword-derived
        // columns stay at zero; their fit-time scalers go degenerate and
        // the columns contribute nothing at serving time.
        let features = FeatureRow {
            age_years: age_years.clamp(0.0, 110.0),
            days_since_admission: numeric(&record, stay_idx).clamp(0.0, 30.0),
            medication_count: numeric(&record, meds_idx),
            history_count: numeric(&record, diagnoses_idx),
            past_history_count: prior_encounters,
            gender: gender.to_string(),
            status: "unknown".to_string(),
            ..Default::default()
        };

        let label = record.get(label_idx).map(str::trim) == Some("<30");
        rows.push(LabeledRow { features, label });
    }
    Ok(rows)
}

fn validate_dataset(rows: &[LabeledRow], positives: usize, options: &TrainingOptions) -> Result<()> {
    if rows.len() < 3 {
        anyhow::bail!(
            "training requires at least 3 rows, got {} from {}",
            rows.len(),
            options.csv_path.display()
        );
    }
    if rows.len() < options.min_rows {
        anyhow::bail!(
            "training requires at least {} rows (min_rows), got {}",
            options.min_rows,
            rows.len()
        );
    }
    if positives == 0 {
        anyhow::bail!("training data contains no positive labels (readmitted '<30')");
    }
    if positives < options.min_positives {
        anyhow::bail!(
            "training requires at least {} positive labels (min_positives), got {}",
            options.min_positives,
            positives
        );
    }
    Ok(())
}

/// Fit scalers, one-hot categories, and logistic coefficients.
fn fit_pipeline(rows: &[LabeledRow]) -> Result<Pipeline> {
    let numeric_columns: Vec<String> = FEATURE_NUMERIC_COLUMNS
        .iter()
        .map(|c| c.to_string())
        .collect();

    let mut numeric_scalers = Vec::with_capacity(numeric_columns.len());
    for column in &numeric_columns {
        let values: Vec<f64> = rows
            .iter()
            .map(|r| r.features.numeric_value(column))
            .collect::<Result<_>>()?;
        numeric_scalers.push(fit_scaler(&values));
    }

    let mut categories: Vec<String> = rows.iter().map(|r| r.features.gender.clone()).collect();
    categories.sort();
    categories.dedup();

    let mut pipeline = Pipeline {
        numeric_columns,
        numeric_scalers,
        categorical_column: "gender".to_string(),
        categories,
        coefficients: Vec::new(),
        intercept: 0.0,
    };

    let transformed: Vec<Vec<f64>> = rows
        .iter()
        .map(|r| pipeline.transform_row(&r.features))
        .collect::<Result<_>>()?;
    let labels: Vec<f64> = rows
        .iter()
        .map(|r| if r.label { 1.0 } else { 0.0 })
        .collect();

    let width = pipeline.transformed_feature_names().len();
    let (coefficients, intercept) = fit_logistic(&transformed, &labels, width);
    pipeline.coefficients = coefficients;
    pipeline.intercept = intercept;
    Ok(pipeline)
}

fn fit_scaler(values: &[f64]) -> ColumnScaler {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    ColumnScaler {
        mean,
        std: variance.sqrt(),
    }
}

/// Full-batch gradient descent with L2 on the weights (not the intercept).
fn fit_logistic(x: &[Vec<f64>], y: &[f64], width: usize) -> (Vec<f64>, f64) {
    let n = x.len() as f64;
    let mut weights = vec![0.0; width];
    let mut intercept = 0.0;

    for _ in 0..EPOCHS {
        let mut weight_grads = vec![0.0; width];
        let mut intercept_grad = 0.0;

        for (row, label) in x.iter().zip(y) {
            let dot: f64 = row.iter().zip(&weights).map(|(xi, wi)| xi * wi).sum();
            let error = sigmoid(dot + intercept) - label;
            for (grad, xi) in weight_grads.iter_mut().zip(row) {
                *grad += error * xi;
            }
            intercept_grad += error;
        }

        for (w, grad) in weights.iter_mut().zip(&weight_grads) {
            *w -= LEARNING_RATE * (grad / n + L2_LAMBDA * *w);
        }
        intercept -= LEARNING_RATE * intercept_grad / n;
    }

    (weights, intercept)
}

/// Score a handful of training rows back through the fitted pipeline and
/// reject the fit if anything comes out non-finite or out of range.
fn sanity_check(pipeline: &Pipeline, rows: &[LabeledRow]) -> Result<()> {
    for row in rows.iter().take(SANITY_CHECK_ROWS.min(rows.len())) {
        let p = pipeline.predict_proba(&row.features)?;
        if !p.is_finite() || !(0.0..=1.0).contains(&p) {
            anyhow::bail!("fitted model produced an invalid probability: {}", p);
        }
    }
    Ok(())
}

/// Platt scaling over the training decisions. Skipped when either class
/// is too thin to anchor both sigmoid tails.
fn fit_calibrator(pipeline: &Pipeline, rows: &[LabeledRow]) -> Result<Option<PlattCalibrator>> {
    let positives = rows.iter().filter(|r| r.label).count();
    let negatives = rows.len() - positives;
    if positives < DIAGNOSTICS_MIN_POSITIVES || negatives < DIAGNOSTICS_MIN_NEGATIVES {
        return Ok(None);
    }

    let decisions: Vec<f64> = rows
        .iter()
        .map(|r| {
            let transformed = pipeline.transform_row(&r.features)?;
            pipeline.decision(&transformed)
        })
        .collect::<Result<_>>()?;
    let labels: Vec<f64> = rows
        .iter()
        .map(|r| if r.label { 1.0 } else { 0.0 })
        .collect();

    let n = decisions.len() as f64;
    let mut a = 1.0;
    let mut b = 0.0;
    for _ in 0..EPOCHS {
        let mut grad_a = 0.0;
        let mut grad_b = 0.0;
        for (d, label) in decisions.iter().zip(&labels) {
            let error = sigmoid(a * d + b) - label;
            grad_a += error * d;
            grad_b += error;
        }
        a -= LEARNING_RATE * grad_a / n;
        b -= LEARNING_RATE * grad_b / n;
    }

    if !a.is_finite() || !b.is_finite() {
        anyhow::bail!("calibration diverged (a={}, b={})", a, b);
    }
    Ok(Some(PlattCalibrator { a, b }))
}

/// Holdout diagnostics, computed only when the split is stable.
fn diagnostics(rows: &[LabeledRow], seed: u64) -> BTreeMap<String, f64> {
    let mut metrics = BTreeMap::new();
    let positives = rows.iter().filter(|r| r.label).count();
    let negatives = rows.len() - positives;
    if positives < DIAGNOSTICS_MIN_POSITIVES
        || negatives < DIAGNOSTICS_MIN_NEGATIVES
        || rows.len() < DIAGNOSTICS_MIN_ROWS
    {
        return metrics;
    }

    let (train_idx, holdout_idx) = stratified_split(rows, seed);
    let train: Vec<LabeledRow> = train_idx
        .iter()
        .map(|&i| LabeledRow {
            features: rows[i].features.clone(),
            label: rows[i].label,
        })
        .collect();

    let Ok(pipeline) = fit_pipeline(&train) else {
        return metrics;
    };

    let mut scores = Vec::with_capacity(holdout_idx.len());
    let mut labels = Vec::with_capacity(holdout_idx.len());
    for &i in &holdout_idx {
        let Ok(p) = pipeline.predict_proba(&rows[i].features) else {
            return metrics;
        };
        scores.push(p);
        labels.push(rows[i].label);
    }

    if let Some(auc) = roc_auc(&scores, &labels) {
        metrics.insert("roc_auc".to_string(), auc);
    }
    if let Some(ap) = average_precision(&scores, &labels) {
        metrics.insert("average_precision".to_string(), ap);
    }
    metrics.insert("brier".to_string(), brier(&scores, &labels));
    metrics
}

/// Seeded stratified split preserving the class balance in the holdout.
fn stratified_split(rows: &[LabeledRow], seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut positives: Vec<usize> = Vec::new();
    let mut negatives: Vec<usize> = Vec::new();
    for (i, row) in rows.iter().enumerate() {
        if row.label {
            positives.push(i);
        } else {
            negatives.push(i);
        }
    }

    let mut rng = SplitMix64::new(seed);
    shuffle(&mut positives, &mut rng);
    shuffle(&mut negatives, &mut rng);

    let mut train = Vec::new();
    let mut holdout = Vec::new();
    for class in [positives, negatives] {
        let holdout_count = ((class.len() as f64) * HOLDOUT_FRACTION).round() as usize;
        let holdout_count = holdout_count.max(1).min(class.len().saturating_sub(1));
        holdout.extend_from_slice(&class[..holdout_count]);
        train.extend_from_slice(&class[holdout_count..]);
    }
    (train, holdout)
}

fn subsample(rows: &mut Vec<LabeledRow>, max_rows: usize, seed: u64) {
    let mut indices: Vec<usize> = (0..rows.len()).collect();
    let mut rng = SplitMix64::new(seed);
    shuffle(&mut indices, &mut rng);
    indices.truncate(max_rows);
    indices.sort_unstable();

    for (offset, idx) in indices.into_iter().enumerate() {
        rows.swap(offset, idx);
    }
    rows.truncate(max_rows);
}

/// Mann-Whitney formulation with tie-averaged ranks.
fn roc_auc(scores: &[f64], labels: &[bool]) -> Option<f64> {
    let positives = labels.iter().filter(|&&l| l).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| {
        scores[a]
            .partial_cmp(&scores[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut ranks = vec![0.0; scores.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let averaged = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = averaged;
        }
        i = j + 1;
    }

    let positive_rank_sum: f64 = labels
        .iter()
        .zip(&ranks)
        .filter(|(l, _)| **l)
        .map(|(_, r)| r)
        .sum();
    let u = positive_rank_sum - (positives as f64) * (positives as f64 + 1.0) / 2.0;
    Some(u / (positives as f64 * negatives as f64))
}

fn average_precision(scores: &[f64], labels: &[bool]) -> Option<f64> {
    let positives = labels.iter().filter(|&&l| l).count();
    if positives == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut hits = 0usize;
    let mut precision_sum = 0.0;
    for (seen, &idx) in order.iter().enumerate() {
        if labels[idx] {
            hits += 1;
            precision_sum += hits as f64 / (seen + 1) as f64;
        }
    }
    Some(precision_sum / positives as f64)
}

fn brier(scores: &[f64], labels: &[bool]) -> f64 {
    let n = scores.len() as f64;
    scores
        .iter()
        .zip(labels)
        .map(|(p, l)| (p - if *l { 1.0 } else { 0.0 }).powi(2))
        .sum::<f64>()
        / n
}

/// Bands derived from the observed base rate, kept apart by a fixed gap.
fn band_thresholds_for(base_rate: f64) -> serde_json::Value {
    let medium = base_rate.clamp(THRESHOLD_MEDIUM_MIN, THRESHOLD_MEDIUM_MAX);
    let high = (medium + THRESHOLD_BAND_GAP).max((base_rate * 2.0).min(THRESHOLD_HIGH_CAP));
    serde_json::json!({ "medium": medium, "high": high })
}

/// Transformed feature names ranked by coefficient magnitude.
fn top_coefficients(pipeline: &Pipeline) -> (Vec<String>, Vec<f64>) {
    let names = pipeline.transformed_feature_names();
    let mut ranked: Vec<(String, f64)> = names
        .into_iter()
        .zip(pipeline.coefficients.iter().copied())
        .collect();
    ranked.sort_by(|a, b| {
        b.1.abs()
            .partial_cmp(&a.1.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked.truncate(TOP_FEATURE_LIMIT);
    ranked.into_iter().unzip()
}

struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    fn new(seed: u64) -> Self {
        SplitMix64 { state: seed }
    }

    fn next(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E3779B97F4A7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
        z ^ (z >> 31)
    }
}

fn shuffle(indices: &mut [usize], rng: &mut SplitMix64) {
    for i in (1..indices.len()).rev() {
        let j = (rng.next() % (i as u64 + 1)) as usize;
        indices.swap(i, j);
    }
}
