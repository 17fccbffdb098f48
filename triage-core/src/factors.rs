//! Ranked factor contributions attached to every prediction
//!
//! Both scoring branches and the override layer emit the same bounded
//! factor shape so the caller never has to care which branch ran.

use serde::{Deserialize, Serialize};

/// Maximum number of factors reported per prediction.
pub const MAX_FACTORS: usize = 5;

/// Contribution magnitudes below this are treated as zero.
pub const CONTRIBUTION_EPSILON: f64 = 1e-9;

/// Direction of a factor's influence on risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

/// One ranked contributing factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RiskFactor {
    pub feature: String,
    pub direction: Direction,
    pub contribution: f64,
}

impl RiskFactor {
    /// Build a factor; direction follows the sign of the contribution.
    pub fn new(feature: impl Into<String>, contribution: f64) -> Self {
        RiskFactor {
            feature: feature.into(),
            direction: if contribution >= 0.0 {
                Direction::Up
            } else {
                Direction::Down
            },
            contribution: round4(contribution),
        }
    }
}

/// Round to 4 decimals, matching the reported probability precision.
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Merge override factors with the primary scorer's factors.
///
/// Overrides come first, near-zero contributions are dropped, and the
/// result is ranked by absolute magnitude and capped at [`MAX_FACTORS`].
/// An empty merge falls back to whichever input list is non-empty.
pub fn merge_factors(overrides: Vec<RiskFactor>, base: Vec<RiskFactor>) -> Vec<RiskFactor> {
    let mut merged: Vec<RiskFactor> = overrides
        .iter()
        .chain(base.iter())
        .filter(|f| f.contribution.abs() >= CONTRIBUTION_EPSILON)
        .cloned()
        .collect();

    merged.sort_by(|a, b| {
        b.contribution
            .abs()
            .partial_cmp(&a.contribution.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    merged.truncate(MAX_FACTORS);

    if merged.is_empty() {
        if !overrides.is_empty() {
            return overrides.into_iter().take(MAX_FACTORS).collect();
        }
        return base.into_iter().take(MAX_FACTORS).collect();
    }
    merged
}
