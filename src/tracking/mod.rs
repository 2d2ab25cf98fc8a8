//! Tracking collaborator: persisted datasets and logged experiments.
//!
//! `Tracker` is the boundary the harness hands results to. `JsonTracker`
//! keeps everything as pretty-printed JSON under one output directory:
//! `datasets/<name>.json` and `experiments/<experiment>.json`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::types::{EvalError, EvalItem, ExperimentSummary};

/// Reference to a stored dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetHandle {
    pub name: String,
    pub location: PathBuf,
}

/// Reference to a logged experiment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentHandle {
    pub name: String,
    pub location: PathBuf,
}

pub trait Tracker: Send + Sync {
    /// Open the named dataset, creating an empty one if needed.
    fn create_or_get_dataset(&self, name: &str, description: Option<&str>) -> Result<DatasetHandle, EvalError>;

    /// Append items whose id is not already stored. Returns how many were added.
    fn insert(&self, dataset: &DatasetHandle, items: &[EvalItem]) -> Result<usize, EvalError>;

    fn load_items(&self, dataset: &DatasetHandle) -> Result<Vec<EvalItem>, EvalError>;

    fn log_experiment(
        &self,
        dataset: &DatasetHandle,
        summary: &ExperimentSummary,
    ) -> Result<ExperimentHandle, EvalError>;
}

/// Default experiment name: `<dataset>-<YYYYMMDD-HHMMSS>`.
pub fn experiment_name(dataset: &str, at: DateTime<Utc>) -> String {
    format!("{dataset}-{}", at.format("%Y%m%d-%H%M%S"))
}

/// Default tracked dataset name: `forecaster-<dataset>-<YYYYMMDD>`.
pub fn tracked_dataset_name(dataset: &str, at: DateTime<Utc>) -> String {
    format!("forecaster-{dataset}-{}", at.format("%Y%m%d"))
}

// ---------------------------------------------------------------------------
// JSON files
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct StoredDataset {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    items: Vec<EvalItem>,
}

#[derive(Debug, Serialize)]
struct StoredExperiment<'a> {
    dataset: &'a str,
    #[serde(flatten)]
    summary: &'a ExperimentSummary,
}

pub struct JsonTracker {
    root: PathBuf,
}

impl JsonTracker {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dataset_path(&self, name: &str) -> PathBuf {
        self.root.join("datasets").join(format!("{}.json", file_stem(name)))
    }

    fn experiment_path(&self, name: &str) -> PathBuf {
        self.root.join("experiments").join(format!("{}.json", file_stem(name)))
    }

    fn read_dataset(path: &Path) -> Result<StoredDataset> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read dataset from {}", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse dataset from {}", path.display()))
    }

    fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(value).context("Failed to serialise")?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
    }
}

fn tracking_err(e: anyhow::Error) -> EvalError {
    EvalError::Tracking(format!("{e:#}"))
}

/// File-system safe version of a dataset or experiment name.
fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect()
}

impl Tracker for JsonTracker {
    fn create_or_get_dataset(&self, name: &str, description: Option<&str>) -> Result<DatasetHandle, EvalError> {
        let path = self.dataset_path(name);
        if path.exists() {
            let stored = Self::read_dataset(&path).map_err(tracking_err)?;
            info!(dataset = name, items = stored.items.len(), "Using existing dataset");
        } else {
            let stored = StoredDataset {
                name: name.to_string(),
                description: description.map(str::to_string),
                created_at: Utc::now(),
                items: Vec::new(),
            };
            Self::write_json(&path, &stored).map_err(tracking_err)?;
            info!(dataset = name, path = %path.display(), "Created dataset");
        }
        Ok(DatasetHandle { name: name.to_string(), location: path })
    }

    fn insert(&self, dataset: &DatasetHandle, items: &[EvalItem]) -> Result<usize, EvalError> {
        let mut stored = Self::read_dataset(&dataset.location).map_err(tracking_err)?;
        let mut known: HashSet<String> = stored.items.iter().map(|i| i.id().to_string()).collect();

        let before = stored.items.len();
        for item in items {
            if known.insert(item.id().to_string()) {
                stored.items.push(item.clone());
            }
        }
        let added = stored.items.len() - before;
        if added < items.len() {
            debug!(dataset = %dataset.name, skipped = items.len() - added, "Skipped items already stored");
        }

        Self::write_json(&dataset.location, &stored).map_err(tracking_err)?;
        info!(dataset = %dataset.name, added, total = stored.items.len(), "Items inserted");
        Ok(added)
    }

    fn load_items(&self, dataset: &DatasetHandle) -> Result<Vec<EvalItem>, EvalError> {
        Self::read_dataset(&dataset.location)
            .map(|s| s.items)
            .map_err(tracking_err)
    }

    fn log_experiment(
        &self,
        dataset: &DatasetHandle,
        summary: &ExperimentSummary,
    ) -> Result<ExperimentHandle, EvalError> {
        let path = self.experiment_path(&summary.experiment);
        if path.exists() {
            warn!(experiment = %summary.experiment, "Overwriting existing experiment log");
        }
        let record = StoredExperiment { dataset: &dataset.name, summary };
        Self::write_json(&path, &record).map_err(tracking_err)?;
        info!(experiment = %summary.experiment, path = %path.display(), "Experiment logged");
        Ok(ExperimentHandle { name: summary.experiment.clone(), location: path })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
