//! Output manifests - the artifacts a step hands to its successor

use crate::core::error::PipelineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Manifest file name inside every step directory
pub const MANIFEST_FILE: &str = "io.json";

/// Reference to one file produced by a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Path relative to the run directory
    pub path: PathBuf,

    /// Ordinal of the step that produced the file
    pub ordinal: usize,

    /// SHA-256 of the file contents at registration time
    pub token: String,

    /// Optional ranking score, lower is better
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl Artifact {
    /// Register an existing file produced under `run_dir`
    pub fn register(
        run_dir: &Path,
        file: &Path,
        ordinal: usize,
        score: Option<f64>,
    ) -> Result<Self, PipelineError> {
        let token = identity_token(file)?;
        let path = file
            .strip_prefix(run_dir)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| file.to_path_buf());
        Ok(Self {
            path,
            ordinal,
            token,
            score,
        })
    }

    /// Absolute location of the artifact for a given run directory
    pub fn resolve(&self, run_dir: &Path) -> PathBuf {
        if self.path.is_absolute() {
            self.path.clone()
        } else {
            run_dir.join(&self.path)
        }
    }

    /// File name without directories, for naming derived outputs
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact".to_string())
    }
}

/// Artifacts exposed by one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputManifest {
    /// Step that wrote the manifest
    pub ordinal: usize,

    /// Module type of that step
    pub module: String,

    pub created_at: DateTime<Utc>,

    pub artifacts: Vec<Artifact>,
}

impl OutputManifest {
    /// Manifest of a run that has no predecessor yet
    pub fn empty() -> Self {
        Self {
            ordinal: 0,
            module: String::new(),
            created_at: Utc::now(),
            artifacts: Vec::new(),
        }
    }

    pub fn new(ordinal: usize, module: impl Into<String>, artifacts: Vec<Artifact>) -> Self {
        Self {
            ordinal,
            module: module.into(),
            created_at: Utc::now(),
            artifacts,
        }
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Load the manifest stored in a step directory
    pub fn load(step_dir: &Path) -> Result<Self, PipelineError> {
        let path = step_dir.join(MANIFEST_FILE);
        let text = std::fs::read_to_string(&path).map_err(|e| PipelineError::io(&path, e))?;
        serde_json::from_str(&text).map_err(|source| PipelineError::ManifestFormat { path, source })
    }

    /// Write the manifest into a step directory
    pub fn save(&self, step_dir: &Path) -> Result<PathBuf, PipelineError> {
        let path = step_dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(self).map_err(|source| {
            PipelineError::ManifestFormat {
                path: path.clone(),
                source,
            }
        })?;
        std::fs::write(&path, json).map_err(|e| PipelineError::io(&path, e))?;
        Ok(path)
    }

    /// Artifacts ordered by score, unscored last, ties keep manifest order
    pub fn ranked(&self) -> Vec<&Artifact> {
        let mut ranked: Vec<&Artifact> = self.artifacts.iter().collect();
        ranked.sort_by(|a, b| match (a.score, b.score) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        ranked
    }

    /// Artifacts whose file is absent or empty under `run_dir`
    pub fn missing_artifacts(&self, run_dir: &Path) -> Vec<PathBuf> {
        self.artifacts
            .iter()
            .map(|a| a.resolve(run_dir))
            .filter(|p| !is_non_empty_file(p))
            .collect()
    }
}

/// Content identity token of a file
pub fn identity_token(file: &Path) -> Result<String, PipelineError> {
    let bytes = std::fs::read(file).map_err(|e| PipelineError::io(file, e))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Whether a path exists and holds at least one byte
pub fn is_non_empty_file(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}
