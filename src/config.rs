//! Run configuration, parsed from TOML.

use crate::data::{ModelKind, Stratum};
use crate::error::PipelineError;
use crate::utils::ensure_dir;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub title: String,
    pub output_folder: PathBuf,
    pub model: ModelKind,
    pub cell_line: String,

    /// Dataset-name prefixes that belong to `cell_line`
    #[serde(default)]
    pub dataset_prefixes: Vec<String>,

    /// Assembled identification table
    pub peptides_table: PathBuf,
    /// Directory of `{stratum}.csv` antigen tables
    pub antigen_folder: PathBuf,
    pub background_folder: PathBuf,
    /// Output folder of a finished canonical run, required for spliced runs
    #[serde(default)]
    pub canonical_results: Option<PathBuf>,

    #[serde(default = "default_n_cores")]
    pub n_cores: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_peptide_lengths")]
    pub peptide_lengths: Vec<usize>,

    /// Transcript-expression columns of the antigen tables used as features
    #[serde(default)]
    pub expression_features: Vec<String>,
    /// Proteomics columns of the antigen tables used as features
    #[serde(default)]
    pub proteomics_features: Vec<String>,

    #[serde(default)]
    pub background: BackgroundConfig,
    #[serde(default)]
    pub training: TrainingSettings,
    #[serde(default)]
    pub spliced: SplicedConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundConfig {
    /// Random peptides drawn per dataset and length
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Scale applied to spliced sampling goals
    #[serde(default = "default_spliced_fraction")]
    pub spliced_sampling_fraction: f64,
    /// Seed length of the remapping index
    #[serde(default = "default_seed_length")]
    pub seed_length: usize,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            spliced_sampling_fraction: default_spliced_fraction(),
            seed_length: default_seed_length(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSettings {
    #[serde(default = "default_n_folds")]
    pub n_folds: usize,
    #[serde(default = "default_search_iterations")]
    pub search_iterations: usize,
    #[serde(default = "default_rounds")]
    pub self_training_rounds: usize,
    /// Quantile of previous-round scores at or below which positives are dropped
    #[serde(default = "default_retention")]
    pub retention_percentile: f64,
    #[serde(default = "default_n_estimators")]
    pub n_estimators: usize,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            n_folds: default_n_folds(),
            search_iterations: default_search_iterations(),
            self_training_rounds: default_rounds(),
            retention_percentile: default_retention(),
            n_estimators: default_n_estimators(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplicedConfig {
    /// Rows per feature-extraction batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Longest gap between the two fragments considered by remapping
    #[serde(default = "default_max_intervening")]
    pub max_intervening: usize,
}

impl Default for SplicedConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_intervening: default_max_intervening(),
        }
    }
}

fn default_n_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_seed() -> u64 {
    42
}

fn default_peptide_lengths() -> Vec<usize> {
    (9..=12).collect()
}

fn default_pool_size() -> usize {
    1_000_000
}

fn default_spliced_fraction() -> f64 {
    0.01
}

fn default_seed_length() -> usize {
    4
}

fn default_n_folds() -> usize {
    10
}

fn default_search_iterations() -> usize {
    10
}

fn default_rounds() -> usize {
    10
}

fn default_retention() -> f64 {
    0.1
}

fn default_n_estimators() -> usize {
    100
}

fn default_batch_size() -> usize {
    1_000
}

fn default_max_intervening() -> usize {
    25
}

impl PipelineConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_str(&content).with_context(|| format!("Invalid config file: {:?}", path))
    }

    /// Parse configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let fail = |message: String| Err(PipelineError::configuration(message));
        if self.training.n_folds < 2 {
            return fail(format!("n_folds must be at least 2, got {}", self.training.n_folds));
        }
        let percentile = self.training.retention_percentile;
        if !(0.0..1.0).contains(&percentile) {
            return fail(format!("retention_percentile must be in [0, 1), got {}", percentile));
        }
        let fraction = self.background.spliced_sampling_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            return fail(format!(
                "spliced_sampling_fraction must be in (0, 1], got {}",
                fraction
            ));
        }
        if self.peptide_lengths.is_empty() {
            return fail("peptide_lengths is empty".to_string());
        }
        if self.dataset_prefixes.is_empty() {
            return fail(format!("no dataset prefixes for cell line {}", self.cell_line));
        }
        if self.spliced.batch_size == 0 || self.n_cores == 0 || self.background.seed_length == 0 {
            return fail("batch_size, n_cores and seed_length must be positive".to_string());
        }
        if self.model == ModelKind::Spliced && self.canonical_results.is_none() {
            return fail("spliced runs need canonical_results".to_string());
        }
        Ok(())
    }

    /// Whether a background dataset belongs to the configured cell line
    pub fn is_eligible_dataset(&self, dataset: &str) -> bool {
        self.dataset_prefixes
            .iter()
            .any(|prefix| dataset.starts_with(prefix.as_str()))
    }

    /// Expression and proteomics columns, in feature order
    pub fn extra_features(&self) -> Vec<String> {
        self.expression_features
            .iter()
            .chain(&self.proteomics_features)
            .cloned()
            .collect()
    }

    pub fn training_dir(&self) -> PathBuf {
        self.output_folder.join("trainingDatasets")
    }

    pub fn multi_mapped_dir(&self) -> PathBuf {
        self.output_folder.join("mmDatasets")
    }

    pub fn models_dir(&self) -> PathBuf {
        self.output_folder.join("models")
    }

    /// Antigen table of a stratum; spliced peptides come from canonical parents
    pub fn antigen_table(&self, stratum: Stratum) -> PathBuf {
        let stratum = match stratum {
            Stratum::Spliced => Stratum::Canonical,
            other => other,
        };
        self.antigen_folder.join(format!("{}.csv", stratum))
    }

    /// Create the output and background directory trees
    pub fn prepare_dirs(&self) -> Result<()> {
        ensure_dir(&self.output_folder)?;
        for sub in [self.training_dir(), self.multi_mapped_dir(), self.models_dir()] {
            ensure_dir(sub)?;
        }
        ensure_dir(&self.background_folder)?;
        for sub in ["frequency", "sample_ratios", "random", "remapped"] {
            ensure_dir(self.background_folder.join(sub))?;
        }
        Ok(())
    }
}
