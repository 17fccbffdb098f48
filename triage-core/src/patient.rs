//! Patient snapshot input contract
//!
//! The snapshot is owned by the record store and arrives fully decrypted.
//! This crate only ever reads it; nothing here mutates patient state.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Read-only view of a patient record as supplied by the record store.
///
/// All fields are optional at the wire level: a patient missing any of
/// them scores as zero/unknown rather than failing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct PatientSnapshot {
    pub date_of_birth: String,
    pub admission_date: String,
    pub gender: String,
    pub status: String,
    pub medications: Vec<Value>,
    pub current_prescriptions: Vec<Value>,
    pub allergies: Vec<Value>,
    pub medical_history: Vec<Value>,
    pub past_medical_history: Vec<Value>,
}

/// Normalize list-valued patient attributes into clean strings.
///
/// Object entries are flattened to a whitespace-joined string of their
/// values, scalar entries are stringified and trimmed, and blank entries
/// are dropped. Duplicates are kept on purpose: repeated entries of a
/// risk item count multiple times.
pub fn normalize_entries(values: &[Value]) -> Vec<String> {
    let mut out = Vec::with_capacity(values.len());
    for value in values {
        let text = match value {
            Value::Object(map) => {
                let parts: Vec<String> = map
                    .values()
                    .map(scalar_text)
                    .filter(|s| !s.is_empty())
                    .collect();
                parts.join(" ")
            }
            other => scalar_text(other),
        };
        if !text.is_empty() {
            out.push(text);
        }
    }
    out
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string().trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_plain_strings() {
        let values = vec![json!("Aspirin"), json!("  Metformin  "), json!("")];
        assert_eq!(normalize_entries(&values), vec!["Aspirin", "Metformin"]);
    }

    #[test]
    fn test_normalize_flattens_objects() {
        let values = vec![json!({"name": "Warfarin", "dose": "5mg"})];
        let normalized = normalize_entries(&values);
        assert_eq!(normalized.len(), 1);
        assert!(normalized[0].contains("Warfarin"));
        assert!(normalized[0].contains("5mg"));
    }

    #[test]
    fn test_normalize_keeps_duplicates() {
        let values = vec![json!("insulin"), json!("insulin")];
        assert_eq!(normalize_entries(&values).len(), 2);
    }

    #[test]
    fn test_normalize_drops_blank_and_null() {
        let values = vec![json!("   "), json!(null), json!("ok")];
        assert_eq!(normalize_entries(&values), vec!["ok"]);
    }

    #[test]
    fn test_snapshot_deserializes_with_missing_fields() {
        let snapshot: PatientSnapshot = serde_json::from_str("{}").unwrap();
        assert!(snapshot.date_of_birth.is_empty());
        assert!(snapshot.medications.is_empty());
    }

    #[test]
    fn test_snapshot_deserializes_mixed_lists() {
        let snapshot: PatientSnapshot = serde_json::from_value(json!({
            "gender": "Female",
            "medical_history": ["Diabetes", {"condition": "Stroke", "year": 2019}]
        }))
        .unwrap();
        let history = normalize_entries(&snapshot.medical_history);
        assert_eq!(history.len(), 2);
        assert!(history[1].contains("Stroke"));
    }
}
