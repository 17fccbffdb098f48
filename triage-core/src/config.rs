//! Project configuration loading and validation
//!
//! Configuration is optional everywhere: the engine runs with built-in
//! defaults when no config file exists. When a file does exist, unknown
//! fields and invalid values are hard errors so a typo cannot silently
//! change scoring behavior.

use crate::artifact::{ArtifactVersion, StoreConfig};
use crate::features::parse_clinical_date;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Config file names probed in order, first hit wins.
const CONFIG_FILE_NAMES: [&str; 2] = [".triagerc.json", "triage.config.json"];

/// Default artifact directory relative to the working directory.
pub const DEFAULT_ARTIFACT_DIR: &str = "artifacts";

/// On-disk configuration shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub struct TriageConfig {
    /// Directory scanned for model artifacts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_dir: Option<PathBuf>,
    /// Pin scoring to one artifact version instead of the newest.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_version: Option<String>,
    /// Score against this date instead of "today" (for replaying
    /// historical snapshots).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_date: Option<String>,
}

impl TriageConfig {
    /// Validate field values beyond what deserialization enforces.
    pub fn validate(&self) -> Result<()> {
        if let Some(version) = &self.preferred_version {
            if ArtifactVersion::parse(version).is_none() {
                anyhow::bail!(
                    "preferred_version '{}' is not a valid version (expected risk-v{{major}}-{{suffix}})",
                    version
                );
            }
        }
        if let Some(dir) = &self.artifact_dir {
            if dir.as_os_str().is_empty() {
                anyhow::bail!("artifact_dir must not be empty");
            }
        }
        if let Some(date) = &self.reference_date {
            if parse_clinical_date(date).is_none() {
                anyhow::bail!(
                    "reference_date '{}' is not a recognized date (expected YYYY-MM-DD)",
                    date
                );
            }
        }
        Ok(())
    }

    /// Resolve to concrete engine settings, filling defaults.
    pub fn resolve(&self, config_path: Option<PathBuf>) -> ResolvedConfig {
        let artifact_dir = self
            .artifact_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ARTIFACT_DIR));
        ResolvedConfig {
            store: StoreConfig {
                artifact_dir,
                preferred_version: self.preferred_version.clone(),
            },
            reference_date: self
                .reference_date
                .as_deref()
                .and_then(parse_clinical_date),
            config_path,
        }
    }
}

/// Fully resolved settings the engine consumes.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub store: StoreConfig,
    /// When set, scoring replays against this date instead of "today".
    pub reference_date: Option<NaiveDate>,
    /// Path of the config file that contributed, if any.
    pub config_path: Option<PathBuf>,
}

/// Probe a directory for a config file.
pub fn discover_config(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILE_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

/// Load and validate one config file.
pub fn load_config_file(path: &Path) -> Result<TriageConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let config: TriageConfig = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid config file: {}", path.display()))?;
    Ok(config)
}

/// Discover, load, and resolve configuration for a working directory.
///
/// No config file is not an error; defaults apply.
pub fn load_and_resolve(dir: &Path) -> Result<ResolvedConfig> {
    match discover_config(dir) {
        Some(path) => {
            debug!(config = %path.display(), "loaded config file");
            let config = load_config_file(&path)?;
            Ok(config.resolve(Some(path)))
        }
        None => Ok(TriageConfig::default().resolve(None)),
    }
}
