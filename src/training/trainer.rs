use crate::config::PipelineConfig;
use crate::data::loader::write_feature_rows;
use crate::data::preprocessing::{load_tables, training_files};
use crate::data::{FeatureRow, FeatureTable, ModelKind};
use crate::error::PipelineResult;
use crate::model::{design_matrix, FoldReport, GbdtParams, ModelStore, RunReport};
use crate::training::folds::{check_positives, CVGroupAssigner};
use crate::training::search::RandomizedSearch;
use crate::training::{
    as_column, best_per_peptide, explain_out_of_fold, fit_folds, predict_out_of_fold,
    shap_columns, CvData, TrainingConfig, TrainingState,
};
use crate::utils::format_duration;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

/// Rows with the columns training appended to them
#[derive(Debug, Clone)]
pub struct ScoredRows {
    pub rows: Vec<FeatureRow>,
    pub columns: Vec<(String, Vec<Option<f64>>)>,
}

impl ScoredRows {
    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, values)| values.as_slice())
    }
}

/// Training result
#[derive(Debug, Clone)]
pub struct TrainingResult {
    /// Final training state
    pub state: TrainingState,
    /// One row per peptide
    pub unique: ScoredRows,
    /// Every occurrence row
    pub all: ScoredRows,
    pub reports: Vec<FoldReport>,
    /// Feature importances of the final fold models
    pub importances: Vec<Vec<f64>>,
    /// Training duration in seconds
    pub duration_secs: f64,
}

/// Trainer for the cross-validated peptide classifiers
pub struct Trainer<'a> {
    pub(crate) config: TrainingConfig,
    pub(crate) features: Vec<String>,
    pub(crate) store: &'a ModelStore,
    pub(crate) pool: rayon::ThreadPool,
}

impl<'a> Trainer<'a> {
    pub fn new(config: TrainingConfig, features: Vec<String>, store: &'a ModelStore) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.n_cores.max(1))
            .build()
            .context("Failed to build training thread pool")?;
        Ok(Self {
            config,
            features,
            store,
            pool,
        })
    }

    pub(crate) fn assigner(&self) -> PipelineResult<CVGroupAssigner> {
        CVGroupAssigner::new(self.config.n_folds, self.config.seed)
    }

    /// Searched parameters for one stage, or the defaults when the search is
    /// disabled
    pub(crate) fn search(&self, data: CvData<'_>, stage: &str) -> PipelineResult<GbdtParams> {
        let base = self.config.base_params();
        if self.config.search_iterations == 0 {
            return Ok(base);
        }
        info!("Hyperparameter search for {}", stage);
        let search = RandomizedSearch::new(self.config.search_iterations, self.config.seed);
        let result = self
            .pool
            .install(|| search.run(data.x, data.y, data.groups, data.features, &base))?;
        info!(
            "{}: {} candidates, best balanced accuracy {:.4}",
            stage, result.evaluated, result.score
        );
        Ok(result.params)
    }

    /// Two-stage training of canonical and cryptic models.
    ///
    /// Stage 1 folds are drawn over parent proteins and score every
    /// occurrence row. Rows are then collapsed to the best occurrence per
    /// peptide and stage 2 retrains on peptide-level folds, saving its fold
    /// models as `combined` and explaining the held-out rows.
    pub fn train_two_stage(&self, table: &FeatureTable) -> Result<TrainingResult> {
        let start_time = Instant::now();
        let n_folds = self.config.n_folds;
        let rows = table.rows();
        let x = design_matrix(&table.schema, rows, &self.features)?;
        let y: Vec<u8> = rows.iter().map(|r| r.label).collect();
        let mut state = TrainingState::RawRows;
        info!(
            "Training on {} rows ({} positive), {} features",
            rows.len(),
            table.positive_count(),
            self.features.len()
        );

        let assigner = self.assigner()?;
        let protein_groups = assigner.groups(rows, |r| r.protein_id.clone());
        check_positives(&y, &protein_groups, n_folds)?;
        state.advance(TrainingState::FoldAssigned)?;

        let stage1_data = CvData {
            x: &x,
            y: &y,
            groups: &protein_groups,
            features: &self.features,
        };
        let params = self.search(stage1_data, "xgb1")?;
        let stage1 = self
            .pool
            .install(|| fit_folds(stage1_data, n_folds, params, "xgb1", None, |_, _| true))?;
        state.advance(TrainingState::Stage1Trained)?;

        let unique_idx = best_per_peptide(rows, &stage1.predictions);
        let unique_rows: Vec<FeatureRow> = unique_idx.iter().map(|&i| rows[i].clone()).collect();
        let unique_x: Vec<Vec<Option<f64>>> = unique_idx.iter().map(|&i| x[i].clone()).collect();
        let unique_y: Vec<u8> = unique_rows.iter().map(|r| r.label).collect();
        info!("Deduplicated {} rows to {} peptides", rows.len(), unique_rows.len());
        state.advance(TrainingState::Deduplicated)?;

        let peptide_folds = assigner.assign_stratified(
            unique_rows.iter().filter(|r| r.label == 1).map(|r| r.peptide.clone()),
            unique_rows.iter().filter(|r| r.label != 1).map(|r| r.peptide.clone()),
        );
        let unique_groups: Vec<usize> = unique_rows.iter().map(|r| peptide_folds[&r.peptide]).collect();
        check_positives(&unique_y, &unique_groups, n_folds)?;
        let stage2_data = CvData {
            x: &unique_x,
            y: &unique_y,
            groups: &unique_groups,
            features: &self.features,
        };
        let params = self.search(stage2_data, "combined")?;
        let stage2 = self
            .pool
            .install(|| fit_folds(stage2_data, n_folds, params, "combined", None, |_, _| true))?;
        for (fold, model) in stage2.models.iter().enumerate() {
            self.store.save(ModelKind::Canonical.model_key(), fold, model)?;
        }
        state.advance(TrainingState::Stage2Trained)?;

        let phis = self.pool.install(|| explain_out_of_fold(stage2_data, &stage2.models));
        state.advance(TrainingState::Explained)?;

        let all_groups: Vec<usize> = rows.iter().map(|r| peptide_folds[&r.peptide]).collect();
        let all_predictions = self
            .pool
            .install(|| predict_out_of_fold(&x, &all_groups, &stage2.models));

        let mut unique_columns = vec![
            as_column("cvGroup_xgb1", unique_idx.iter().map(|&i| protein_groups[i] as f64)),
            as_column("prediction_xgb1", unique_idx.iter().map(|&i| stage1.predictions[i])),
            as_column("cvGroup", unique_groups.iter().map(|&g| g as f64)),
            as_column("prediction", stage2.predictions.iter().copied()),
        ];
        unique_columns.extend(shap_columns(&self.features, &phis));
        let all_columns = vec![
            as_column("cvGroup_xgb1", protein_groups.iter().map(|&g| g as f64)),
            as_column("prediction_xgb1", stage1.predictions.iter().copied()),
            as_column("cvGroup", all_groups.iter().map(|&g| g as f64)),
            as_column("prediction", all_predictions),
        ];

        let mut reports = stage1.reports;
        reports.extend(stage2.reports);
        let duration_secs = start_time.elapsed().as_secs_f64();
        info!("Training finished in {}", format_duration(duration_secs));
        Ok(TrainingResult {
            state,
            unique: ScoredRows {
                rows: unique_rows,
                columns: unique_columns,
            },
            all: ScoredRows {
                rows: rows.to_vec(),
                columns: all_columns,
            },
            reports,
            importances: stage2.models.iter().map(|m| m.feature_importance()).collect(),
            duration_secs,
        })
    }
}

pub fn unique_scored_path(output_folder: &Path) -> PathBuf {
    output_folder.join("unique_peps_scored.csv")
}

pub fn all_scored_path(output_folder: &Path) -> PathBuf {
    output_folder.join("all_peps_scored.csv")
}

/// Write the scored tables, importances and fold metrics of a finished run
pub fn write_outputs(
    config: &PipelineConfig,
    table: &FeatureTable,
    features: &[String],
    store: &ModelStore,
    result: &TrainingResult,
) -> Result<()> {
    let unique_path = unique_scored_path(&config.output_folder);
    write_feature_rows(&unique_path, &table.schema, &result.unique.rows, &result.unique.columns)?;
    info!("Saved {} scored peptides to {:?}", result.unique.rows.len(), unique_path);
    let all_path = all_scored_path(&config.output_folder);
    write_feature_rows(&all_path, &table.schema, &result.all.rows, &result.all.columns)?;

    store.write_importances(features, &result.importances)?;
    store.write_report(&RunReport {
        title: config.title.clone(),
        model: config.model.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        n_folds: config.training.n_folds,
        folds: result.reports.clone(),
    })?;
    Ok(())
}

/// Load the training tables of the configured model and train it
pub fn run_training(config: &PipelineConfig) -> Result<TrainingResult> {
    let extra = config.extra_features();
    let schema = config.model.schema(&extra);
    let features = config.model.train_features(&extra);
    let files = training_files(config, &config.training_dir())?;
    if files.is_empty() {
        anyhow::bail!("No training tables in {:?}", config.training_dir());
    }
    let table = load_tables(&files, &schema)?;
    info!("Loaded {} training rows from {} files", table.len(), files.len());

    let store = ModelStore::new(config.models_dir())?;
    let trainer = Trainer::new(TrainingConfig::from_pipeline(config), features.clone(), &store)?;
    let result = match config.model {
        ModelKind::Canonical | ModelKind::Cryptic => trainer.train_two_stage(&table)?,
        ModelKind::Spliced => trainer.train_self_training(&table)?,
    };
    write_outputs(config, &table, &features, &store, &result)?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::FeatureSchema;
    use crate::training::testing::{quick_config, synthetic_table};

    fn features() -> Vec<String> {
        vec!["signal".to_string(), "noise".to_string()]
    }

    #[test]
    fn test_two_stage_training() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path()).unwrap();
        let table = synthetic_table(60, 2);
        let trainer = Trainer::new(quick_config(), features(), &store).unwrap();
        let result = trainer.train_two_stage(&table).unwrap();

        assert_eq!(result.state, TrainingState::Explained);
        assert_eq!(result.unique.rows.len(), 60);
        assert_eq!(result.all.rows.len(), 120);
        assert_eq!(store.list(ModelKind::Canonical.model_key()).unwrap().len(), 3);
        assert_eq!(result.reports.len(), 6);
        assert_eq!(result.importances.len(), 3);

        let predictions = result.unique.column("prediction").unwrap();
        let correct = predictions
            .iter()
            .zip(&result.unique.rows)
            .filter(|(p, r)| (p.unwrap() > 0.5) == (r.label == 1))
            .count();
        assert!(correct >= 54, "{} of 60 correct", correct);

        let shap = result.unique.column("signal_shap").unwrap();
        assert_eq!(shap.len(), 60);
    }

    #[test]
    fn test_two_stage_rejects_fold_without_positives() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path()).unwrap();
        let mut table = FeatureTable::new(FeatureSchema::new(features(), Vec::new()));
        for p in 0..6 {
            table
                .push(FeatureRow {
                    peptide: format!("PEP{}", p),
                    protein_id: format!("PROT{}", p),
                    label: (p == 0) as u8,
                    values: vec![Some(p as f64), None],
                    annotations: Vec::new(),
                })
                .unwrap();
        }
        let trainer = Trainer::new(quick_config(), features(), &store).unwrap();
        let err = trainer.train_two_stage(&table).unwrap_err();
        assert!(err.to_string().contains("no positive"));
    }
}
