//! Core engine for clinical risk probability and seriousness scoring.
//!
//! The engine turns a patient snapshot into a calibrated risk probability,
//! a qualitative band, a 0-100 seriousness score with a recommended
//! response tier, and up to five ranked contributing factors. A trained
//! classifier artifact is used when one can be loaded; otherwise a
//! deterministic heuristic scores the call. The two branches share the
//! feature schema, the contextual override layer, and the seriousness
//! assessment, so callers see one uniform output shape.
//!
//! Global invariants enforced across modules:
//! - Scoring is total: any snapshot yields a prediction, never an error
//! - Probabilities are clamped to [0.01, 0.95] after overrides
//! - Artifacts are immutable and written atomically
//! - Identical input and artifact state yield identical output

pub mod adjust;
pub mod artifact;
pub mod band;
pub mod config;
pub mod factors;
pub mod features;
pub mod heuristic;
pub mod model;
pub mod patient;
pub mod predict;
pub mod seriousness;
pub mod train;

pub use artifact::{ArtifactStore, ClassifierArtifact, StoreConfig};
pub use band::{BandThresholds, RiskBand};
pub use config::{load_and_resolve, ResolvedConfig, TriageConfig};
pub use factors::{Direction, RiskFactor};
pub use patient::PatientSnapshot;
pub use predict::{Prediction, RiskEngine, ScoringMode};
pub use seriousness::SeriousnessLevel;
pub use train::{train_and_save, TrainingOptions, TrainingResult};

/// Score a patient against the artifacts in `artifact_dir`.
///
/// Convenience wrapper over [`RiskEngine`] for one-shot callers.
pub fn predict(patient: &PatientSnapshot, artifact_dir: impl Into<std::path::PathBuf>) -> Prediction {
    RiskEngine::new(StoreConfig::new(artifact_dir)).predict(patient)
}
