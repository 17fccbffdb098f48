//! Probability to risk band mapping
//!
//! Thresholds come from a trained artifact when one is available and fall
//! back to documented defaults otherwise. Malformed threshold values are a
//! configuration error recovered with the default for that side; they
//! never fail a scoring call.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_MEDIUM_THRESHOLD: f64 = 0.15;
pub const DEFAULT_HIGH_THRESHOLD: f64 = 0.35;

/// Discrete risk band derived from a probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskBand {
    Low,
    Medium,
    High,
}

impl RiskBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskBand::Low => "low",
            RiskBand::Medium => "medium",
            RiskBand::High => "high",
        }
    }
}

/// Band thresholds with the ordering guard applied on read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandThresholds {
    pub medium: f64,
    pub high: f64,
}

impl Default for BandThresholds {
    fn default() -> Self {
        BandThresholds {
            medium: DEFAULT_MEDIUM_THRESHOLD,
            high: DEFAULT_HIGH_THRESHOLD,
        }
    }
}

impl BandThresholds {
    /// Parse artifact-supplied thresholds leniently.
    ///
    /// Each side accepts a JSON number or numeric string and falls back to
    /// its default independently on anything else.
    pub fn from_value(value: &Value) -> Self {
        BandThresholds {
            medium: lenient_f64(value.get("medium")).unwrap_or(DEFAULT_MEDIUM_THRESHOLD),
            high: lenient_f64(value.get("high")).unwrap_or(DEFAULT_HIGH_THRESHOLD),
        }
    }

    /// Thresholds after the ordering guard: `high <= medium` forces
    /// `high = medium + 0.05`.
    pub fn effective(&self) -> (f64, f64) {
        let medium = self.medium;
        let high = if self.high <= medium {
            medium + 0.05
        } else {
            self.high
        };
        (medium, high)
    }

    /// Effective high threshold, used by the age policy floor.
    pub fn effective_high(&self) -> f64 {
        self.effective().1
    }
}

fn lenient_f64(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Map a probability to a band using guarded thresholds.
pub fn classify(probability: f64, thresholds: &BandThresholds) -> RiskBand {
    let (medium, high) = thresholds.effective();
    if probability >= high {
        RiskBand::High
    } else if probability >= medium {
        RiskBand::Medium
    } else {
        RiskBand::Low
    }
}
