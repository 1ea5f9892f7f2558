use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::data::loader::create_table;
use crate::model::metrics::Metrics;
use crate::model::{Gbdt, GbdtParams};
use crate::utils::stats::{mean, std_dev};

/// Evaluation of one fold model on its held-out rows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoldReport {
    /// Training stage, e.g. `xgb1`, `combined` or `spliced`
    pub stage: String,
    /// Self-training round, absent for single-pass training
    pub round: Option<usize>,
    pub fold: usize,
    pub n_train: usize,
    pub n_test: usize,
    pub params: GbdtParams,
    pub metrics: Metrics,
}

/// Run metadata written next to the fold models
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub title: String,
    pub model: String,
    pub version: String,
    pub n_folds: usize,
    pub folds: Vec<FoldReport>,
}

/// Fold models and their summaries under one models directory
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).context("Failed to create models directory")?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn model_path(&self, key: &str, fold: usize) -> PathBuf {
        self.dir.join(format!("clf_{}_{}.json", key, fold))
    }

    pub fn save(&self, key: &str, fold: usize, model: &Gbdt) -> Result<PathBuf> {
        let path = self.model_path(key, fold);
        model.save(&path)?;
        debug!("Saved model: {:?}", path);
        Ok(path)
    }

    pub fn load(&self, key: &str, fold: usize) -> Result<Gbdt> {
        Gbdt::load(self.model_path(key, fold))
    }

    /// Fold indices and paths of every model saved under `key`, by fold
    pub fn list(&self, key: &str) -> Result<Vec<(usize, PathBuf)>> {
        let prefix = format!("clf_{}_", key);
        let mut models = Vec::new();
        for entry in fs::read_dir(&self.dir).context("Failed to read models directory")? {
            let path = entry.context("Failed to read directory entry")?.path();
            if path.extension().map(|e| e != "json").unwrap_or(true) {
                continue;
            }
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
            if let Some(fold) = stem.strip_prefix(&prefix).and_then(|f| f.parse::<usize>().ok()) {
                models.push((fold, path));
            }
        }
        models.sort_by_key(|(fold, _)| *fold);
        Ok(models)
    }

    pub fn load_all(&self, key: &str) -> Result<Vec<Gbdt>> {
        let models = self
            .list(key)?
            .into_iter()
            .map(|(_, path)| Gbdt::load(path))
            .collect::<Result<Vec<_>>>()?;
        if models.is_empty() {
            anyhow::bail!("No clf_{}_*.json models in {:?}", key, self.dir);
        }
        info!("Loaded {} {} models", models.len(), key);
        Ok(models)
    }

    /// Per-fold feature importances with their mean and standard deviation
    pub fn write_importances(&self, features: &[String], per_fold: &[Vec<f64>]) -> Result<PathBuf> {
        let path = self.dir.join("importances.csv");
        let mut writer = create_table(&path)?;
        let mut header = vec!["feature".to_string()];
        header.extend((0..per_fold.len()).map(|fold| format!("fold_{}", fold)));
        header.extend(["mean".to_string(), "std".to_string()]);
        writer.write_record(&header)?;

        for (idx, feature) in features.iter().enumerate() {
            let values: Vec<f64> = per_fold.iter().map(|fold| fold.get(idx).copied().unwrap_or(0.0)).collect();
            let mut record = vec![feature.clone()];
            record.extend(values.iter().map(|v| v.to_string()));
            record.push(mean(&values).map(|v| v.to_string()).unwrap_or_default());
            record.push(std_dev(&values).map(|v| v.to_string()).unwrap_or_default());
            writer.write_record(&record)?;
        }
        writer.flush()?;
        info!("Saved feature importances: {:?}", path);
        Ok(path)
    }

    pub fn write_report(&self, report: &RunReport) -> Result<PathBuf> {
        let path = self.dir.join("metrics.json");
        let json = serde_json::to_string_pretty(report).context("Failed to serialize metrics")?;
        fs::write(&path, json).context("Failed to write metrics file")?;
        info!("Saved metrics: {:?}", path);
        Ok(path)
    }

    pub fn read_report(&self) -> Result<RunReport> {
        let path = self.dir.join("metrics.json");
        let json = fs::read_to_string(&path).context("Failed to read metrics file")?;
        serde_json::from_str(&json).context("Failed to parse metrics file")
    }
}
