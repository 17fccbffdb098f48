//! Versioned classifier artifacts and the tolerant artifact store
//!
//! Global invariants enforced:
//! - Artifacts are write-once and read-many; no mutation API exists
//! - The store never raises on the serving path: a missing directory,
//!   an empty directory, or a directory of corrupt files all report
//!   "no artifact" and the caller degrades to heuristic scoring
//! - Writes are atomic (temp file + rename) so a concurrent reader never
//!   observes a half-written artifact

use crate::model::{Pipeline, PlattCalibrator};
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::warn;

/// Schema version for artifact files.
pub const ARTIFACT_SCHEMA_VERSION: u32 = 1;

const ARTIFACT_PREFIX: &str = "risk_model_";
const ARTIFACT_EXT: &str = "json";

/// Immutable, versioned classifier bundle persisted by the trainer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ClassifierArtifact {
    pub schema_version: u32,
    pub model_version: String,
    pub pipeline: Pipeline,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calibrator: Option<PlattCalibrator>,
    /// Exact feature column order used at fit time.
    pub feature_columns: Vec<String>,
    /// Lenient by design: malformed values fall back per side.
    #[serde(default)]
    pub band_thresholds: Value,
    /// Legacy explainability fallback for artifacts whose live
    /// coefficient extraction fails.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub top_feature_names: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub top_feature_weights: Vec<f64>,
    #[serde(default)]
    pub training_metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub base_rate: f64,
}

impl ClassifierArtifact {
    /// Serialize to pretty JSON (deterministic field order).
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize artifact to JSON")
    }

    /// Deserialize and validate the schema version.
    pub fn from_json(json: &str) -> Result<Self> {
        let artifact: ClassifierArtifact =
            serde_json::from_str(json).context("failed to deserialize artifact from JSON")?;
        if artifact.schema_version != ARTIFACT_SCHEMA_VERSION {
            anyhow::bail!(
                "artifact schema version mismatch: expected {}, got {}",
                ARTIFACT_SCHEMA_VERSION,
                artifact.schema_version
            );
        }
        if artifact.feature_columns.is_empty() {
            anyhow::bail!("artifact has no recorded feature columns");
        }
        Ok(artifact)
    }
}

/// Parsed `risk-v{major}-{suffix}` version identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactVersion {
    pub major: u32,
    pub suffix: String,
}

impl ArtifactVersion {
    pub fn parse(version: &str) -> Option<Self> {
        // Compiled per call; version parsing is not on a hot path.
        let re = Regex::new(r"^risk-v(\d+)-([A-Za-z0-9]+)$").ok()?;
        let caps = re.captures(version)?;
        Some(ArtifactVersion {
            major: caps.get(1)?.as_str().parse().ok()?,
            suffix: caps.get(2)?.as_str().to_string(),
        })
    }
}

/// File name for a version string: `risk_model_{version}.json`.
pub fn artifact_filename(version: &str) -> String {
    format!("{ARTIFACT_PREFIX}{version}.{ARTIFACT_EXT}")
}

/// Explicit store settings; nothing is read from ambient process state.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub artifact_dir: PathBuf,
    /// Exact version moved to the front of the load order when present.
    pub preferred_version: Option<String>,
}

impl StoreConfig {
    pub fn new(artifact_dir: impl Into<PathBuf>) -> Self {
        StoreConfig {
            artifact_dir: artifact_dir.into(),
            preferred_version: None,
        }
    }
}

/// Result of one tolerant store scan.
#[derive(Debug, Default)]
pub struct ArtifactLoadOutcome {
    pub artifact: Option<ClassifierArtifact>,
    /// Diagnostics for candidates that failed to load, newest first.
    pub skipped: Vec<String>,
}

/// Discovers, orders, and loads versioned artifacts from a directory.
///
/// No cross-call cache by design: every scoring call re-scans so a newly
/// trained artifact becomes visible without a restart.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    config: StoreConfig,
}

impl ArtifactStore {
    pub fn new(config: StoreConfig) -> Self {
        ArtifactStore { config }
    }

    pub fn artifact_dir(&self) -> &Path {
        &self.config.artifact_dir
    }

    /// Load the best available artifact, skipping unreadable candidates.
    pub fn load_latest(&self) -> ArtifactLoadOutcome {
        let mut outcome = ArtifactLoadOutcome::default();
        let candidates = match self.ordered_candidates() {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(error = %err, "artifact directory scan failed");
                return outcome;
            }
        };

        for path in candidates {
            match load_artifact(&path) {
                Ok(artifact) => {
                    outcome.artifact = Some(artifact);
                    return outcome;
                }
                Err(err) => {
                    let diagnostic = format!("{}: {err:#}", path.display());
                    warn!(artifact = %path.display(), error = %err, "skipping unreadable artifact");
                    outcome.skipped.push(diagnostic);
                }
            }
        }
        outcome
    }

    /// Candidate files ordered by parsed version descending, tie-broken by
    /// modification time descending, with the preferred version first.
    fn ordered_candidates(&self) -> Result<Vec<PathBuf>> {
        let dir = &self.config.artifact_dir;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut candidates: Vec<(PathBuf, ArtifactVersion, SystemTime)> = Vec::new();
        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("failed to read artifact directory: {}", dir.display()))?
        {
            let entry = entry?;
            let path = entry.path();
            let Some(version) = version_from_filename(&path) else {
                continue;
            };
            let mtime = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            candidates.push((path, version, mtime));
        }

        candidates.sort_by(|a, b| b.1.major.cmp(&a.1.major).then_with(|| b.2.cmp(&a.2)));

        if let Some(preferred) = &self.config.preferred_version {
            let preferred_file = artifact_filename(preferred);
            if let Some(idx) = candidates
                .iter()
                .position(|(p, _, _)| p.file_name().is_some_and(|n| n == preferred_file.as_str()))
            {
                let preferred_entry = candidates.remove(idx);
                candidates.insert(0, preferred_entry);
            }
        }

        Ok(candidates.into_iter().map(|(p, _, _)| p).collect())
    }
}

/// Extract a parsed version from `risk_model_{version}.json`, if any.
fn version_from_filename(path: &Path) -> Option<ArtifactVersion> {
    if path.extension().and_then(|e| e.to_str()) != Some(ARTIFACT_EXT) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let version = stem.strip_prefix(ARTIFACT_PREFIX)?;
    ArtifactVersion::parse(version)
}

fn load_artifact(path: &Path) -> Result<ClassifierArtifact> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read artifact: {}", path.display()))?;
    ClassifierArtifact::from_json(&json)
}

/// Persist an artifact under its version name, atomically.
///
/// Write-once: an existing file for the same version is an error.
pub fn persist_artifact(dir: &Path, artifact: &ClassifierArtifact) -> Result<PathBuf> {
    let path = dir.join(artifact_filename(&artifact.model_version));
    if path.exists() {
        anyhow::bail!(
            "artifact already exists: {} (artifacts are immutable)",
            path.display()
        );
    }
    let json = artifact.to_json()?;
    atomic_write(&path, &json)
        .with_context(|| format!("failed to persist artifact: {}", path.display()))?;
    Ok(path)
}

/// Write data to file atomically using temp file + rename.
pub fn atomic_write(path: &Path, contents: &str) -> Result<()> {
    use std::fs;
    use std::io::Write;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }

    let temp_path = path.with_extension("tmp");

    let mut file = fs::File::create(&temp_path)
        .with_context(|| format!("failed to create temp file: {}", temp_path.display()))?;
    file.write_all(contents.as_bytes())
        .with_context(|| format!("failed to write to temp file: {}", temp_path.display()))?;
    file.sync_all()
        .with_context(|| format!("failed to sync temp file: {}", temp_path.display()))?;
    drop(file);

    fs::rename(&temp_path, path)
        .with_context(|| format!("failed to rename temp file to: {}", path.display()))?;

    Ok(())
}
