//! Feature construction from a patient snapshot
//!
//! Global invariants enforced:
//! - Column set and order are identical at training time and serving time
//! - Unparsable or missing input renders as a neutral zero, never an error
//! - Identical input yields identical features

use crate::patient::{normalize_entries, PatientSnapshot};
use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime, Utc};

/// Numeric feature columns fed to the trained model, in fit order.
pub const FEATURE_NUMERIC_COLUMNS: [&str; 11] = [
    "age_years",
    "days_since_admission",
    "medication_count",
    "history_count",
    "past_history_count",
    "allergy_count",
    "high_risk_allergy_count",
    "current_prescription_count",
    "high_risk_prescription_count",
    "high_risk_history_count",
    "serious_condition_score",
];

/// Categorical feature columns, in fit order.
pub const FEATURE_CATEGORICAL_COLUMNS: [&str; 1] = ["gender"];

/// Allergy terms that mark an entry as high risk.
const HIGH_RISK_ALLERGY_TERMS: [&str; 6] = [
    "penicillin",
    "sulfa",
    "latex",
    "contrast",
    "anesthesia",
    "anaphylaxis",
];

/// Prescription terms that mark an entry as high risk.
const HIGH_RISK_PRESCRIPTION_TERMS: [&str; 10] = [
    "warfarin",
    "insulin",
    "digoxin",
    "methotrexate",
    "chemotherapy",
    "opioid",
    "morphine",
    "fentanyl",
    "lithium",
    "amiodarone",
];

/// History terms that mark an entry as high risk.
const HIGH_RISK_HISTORY_TERMS: [&str; 8] = [
    "stroke",
    "heart attack",
    "myocardial",
    "sepsis",
    "cancer",
    "renal failure",
    "organ transplant",
    "embolism",
];

/// Severity weights summed into `serious_condition_score`.
const SERIOUS_CONDITION_WEIGHTS: [(&str, f64); 13] = [
    ("sepsis", 40.0),
    ("stroke", 35.0),
    ("myocardial", 35.0),
    ("heart failure", 30.0),
    ("cancer", 30.0),
    ("embolism", 30.0),
    ("renal failure", 25.0),
    ("transplant", 25.0),
    ("pneumonia", 20.0),
    ("copd", 15.0),
    ("diabetes", 10.0),
    ("hypertension", 8.0),
    ("asthma", 8.0),
];

/// Full model column order: numerics first, then categoricals.
pub fn feature_column_order() -> Vec<String> {
    FEATURE_NUMERIC_COLUMNS
        .iter()
        .chain(FEATURE_CATEGORICAL_COLUMNS.iter())
        .map(|c| (*c).to_string())
        .collect()
}

/// One fixed-schema feature row built fresh per scoring call.
///
/// The clamped `age_years` / `days_since_admission` are the trained-model
/// view; the `raw_*` fields keep the true magnitudes for policy overrides
/// that must see values like age 115.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureRow {
    pub age_years: f64,
    pub days_since_admission: f64,
    pub medication_count: f64,
    pub history_count: f64,
    pub past_history_count: f64,
    pub allergy_count: f64,
    pub high_risk_allergy_count: f64,
    pub current_prescription_count: f64,
    pub high_risk_prescription_count: f64,
    pub high_risk_history_count: f64,
    pub serious_condition_score: f64,
    pub gender: String,
    /// Out-of-band: consumed by heuristic/adjustment layers, never the model.
    pub status: String,
    pub raw_age_years: Option<f64>,
    pub raw_days_since_admission: Option<f64>,
}

impl FeatureRow {
    /// Build a feature row from a patient snapshot against "now".
    pub fn from_patient(patient: &PatientSnapshot) -> Self {
        Self::from_patient_at(patient, Utc::now().date_naive())
    }

    /// Build a feature row against an explicit reference date.
    pub fn from_patient_at(patient: &PatientSnapshot, reference: NaiveDate) -> Self {
        let dob = parse_clinical_date(&patient.date_of_birth);
        let admission = parse_clinical_date(&patient.admission_date);

        let raw_age_years = dob.map(|d| (reference - d).num_days() as f64 / 365.0);
        let raw_days_since_admission = admission.map(|d| (reference - d).num_days() as f64);

        let age_years = raw_age_years.map_or(0.0, |a| a.floor().clamp(0.0, 110.0));
        let days_since_admission =
            raw_days_since_admission.map_or(0.0, |d| d.clamp(0.0, 30.0));

        let medications = normalize_entries(&patient.medications);
        let prescriptions = normalize_entries(&patient.current_prescriptions);
        let allergies = normalize_entries(&patient.allergies);
        let history = normalize_entries(&patient.medical_history);
        let past_history = normalize_entries(&patient.past_medical_history);

        let mut serious_sources: Vec<&str> = Vec::new();
        serious_sources.extend(history.iter().map(String::as_str));
        serious_sources.extend(past_history.iter().map(String::as_str));
        serious_sources.extend(prescriptions.iter().map(String::as_str));

        FeatureRow {
            age_years,
            days_since_admission,
            medication_count: medications.len() as f64,
            history_count: history.len() as f64,
            past_history_count: past_history.len() as f64,
            allergy_count: allergies.len() as f64,
            high_risk_allergy_count: count_matching(&allergies, &HIGH_RISK_ALLERGY_TERMS),
            current_prescription_count: prescriptions.len() as f64,
            high_risk_prescription_count: count_matching(
                &prescriptions,
                &HIGH_RISK_PRESCRIPTION_TERMS,
            ),
            high_risk_history_count: count_matching_all(
                &[&history, &past_history],
                &HIGH_RISK_HISTORY_TERMS,
            ),
            serious_condition_score: serious_condition_score(&serious_sources),
            gender: normalize_category(&patient.gender),
            status: normalize_category(&patient.status),
            raw_age_years,
            raw_days_since_admission,
        }
    }

    /// Numeric value for a model column by name.
    ///
    /// Unknown columns are a schema mismatch between fit time and serving
    /// time and must raise rather than silently dropping a column.
    pub fn numeric_value(&self, column: &str) -> Result<f64> {
        let value = match column {
            "age_years" => self.age_years,
            "days_since_admission" => self.days_since_admission,
            "medication_count" => self.medication_count,
            "history_count" => self.history_count,
            "past_history_count" => self.past_history_count,
            "allergy_count" => self.allergy_count,
            "high_risk_allergy_count" => self.high_risk_allergy_count,
            "current_prescription_count" => self.current_prescription_count,
            "high_risk_prescription_count" => self.high_risk_prescription_count,
            "high_risk_history_count" => self.high_risk_history_count,
            "serious_condition_score" => self.serious_condition_score,
            other => anyhow::bail!("unknown numeric feature column: {}", other),
        };
        Ok(value)
    }

    /// Categorical value for a model column by name.
    pub fn categorical_value(&self, column: &str) -> Result<&str> {
        match column {
            "gender" => Ok(&self.gender),
            other => anyhow::bail!("unknown categorical feature column: {}", other),
        }
    }

    pub fn is_critical(&self) -> bool {
        self.status == "critical"
    }

    pub fn is_discharged(&self) -> bool {
        self.status == "discharged"
    }
}

/// Parse ISO-8601 dates and the common datetime layouts seen in records.
/// Empty or unparsable input is `None`, never an error.
pub fn parse_clinical_date(value: &str) -> Option<NaiveDate> {
    let raw = value.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.date());
        }
    }
    None
}

fn normalize_category(value: &str) -> String {
    let normalized = value.trim().to_lowercase();
    if normalized.is_empty() {
        "unknown".to_string()
    } else {
        normalized
    }
}

fn count_matching(entries: &[String], terms: &[&str]) -> f64 {
    entries
        .iter()
        .filter(|entry| {
            let lower = entry.to_lowercase();
            terms.iter().any(|term| lower.contains(term))
        })
        .count() as f64
}

fn count_matching_all(groups: &[&Vec<String>], terms: &[&str]) -> f64 {
    groups.iter().map(|g| count_matching(g, terms)).sum()
}

fn serious_condition_score(entries: &[&str]) -> f64 {
    let mut score = 0.0;
    for entry in entries {
        let lower = entry.to_lowercase();
        for (term, weight) in SERIOUS_CONDITION_WEIGHTS {
            if lower.contains(term) {
                score += weight;
            }
        }
    }
    score
}
