pub mod folds;
pub mod search;
pub mod self_training;
pub mod trainer;

pub use folds::{check_positives, CVGroupAssigner};
pub use search::{RandomizedSearch, SearchSpace};
pub use trainer::{run_training, ScoredRows, Trainer, TrainingResult};

use crate::config::PipelineConfig;
use crate::data::FeatureRow;
use crate::error::{PipelineError, PipelineResult};
use crate::model::metrics::Metrics;
use crate::model::{shap, FoldReport, Gbdt, GbdtParams};
use crate::utils::progress_bar;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info};

/// Training configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Number of cross-validation folds
    pub n_folds: usize,
    /// Grid points sampled by the hyperparameter search; 0 keeps the defaults
    pub search_iterations: usize,
    /// Filtered rounds after round 0 of self-training
    pub self_training_rounds: usize,
    /// Quantile of previous-round scores a positive must exceed to stay
    pub retention_percentile: f64,
    /// Trees per model
    pub n_estimators: usize,
    /// Worker threads for search and batch prediction
    pub n_cores: usize,
    /// Random seed
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            n_folds: 10,
            search_iterations: 10,
            self_training_rounds: 10,
            retention_percentile: 0.1,
            n_estimators: 100,
            n_cores: 4,
            seed: 42,
        }
    }
}

impl TrainingConfig {
    pub fn from_pipeline(config: &PipelineConfig) -> Self {
        let training = &config.training;
        Self {
            n_folds: training.n_folds,
            search_iterations: training.search_iterations,
            self_training_rounds: training.self_training_rounds,
            retention_percentile: training.retention_percentile,
            n_estimators: training.n_estimators,
            n_cores: config.n_cores,
            seed: config.seed,
        }
    }

    /// Booster defaults every search starts from
    pub fn base_params(&self) -> GbdtParams {
        GbdtParams {
            n_estimators: self.n_estimators,
            seed: self.seed,
            ..Default::default()
        }
    }
}

/// Training state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingState {
    RawRows,
    FoldAssigned,
    Stage1Trained,
    Deduplicated,
    Stage2Trained,
    Round0Trained,
    RoundFiltered(usize),
    RoundTrained(usize),
    FinalDeduplicated,
    Explained,
}

impl TrainingState {
    pub fn can_advance_to(&self, next: TrainingState) -> bool {
        use TrainingState::*;
        match (*self, next) {
            (RawRows, FoldAssigned) => true,
            (FoldAssigned, Stage1Trained | Round0Trained) => true,
            (Stage1Trained, Deduplicated) => true,
            (Deduplicated, Stage2Trained) => true,
            (Stage2Trained, Explained) => true,
            (Round0Trained, RoundFiltered(1)) => true,
            (RoundFiltered(k), RoundTrained(j)) => k == j,
            (RoundTrained(k), RoundFiltered(j)) => j == k + 1,
            (Round0Trained | RoundTrained(_), FinalDeduplicated) => true,
            (FinalDeduplicated, Explained) => true,
            _ => false,
        }
    }

    pub fn advance(&mut self, next: TrainingState) -> PipelineResult<()> {
        if !self.can_advance_to(next) {
            return Err(PipelineError::configuration(format!(
                "invalid training transition {} -> {}",
                self, next
            )));
        }
        debug!("Training state {} -> {}", self, next);
        *self = next;
        Ok(())
    }
}

impl fmt::Display for TrainingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainingState::RawRows => write!(f, "RAW_ROWS"),
            TrainingState::FoldAssigned => write!(f, "FOLD_ASSIGNED"),
            TrainingState::Stage1Trained => write!(f, "STAGE1_TRAINED"),
            TrainingState::Deduplicated => write!(f, "DEDUPLICATED"),
            TrainingState::Stage2Trained => write!(f, "STAGE2_TRAINED"),
            TrainingState::Round0Trained => write!(f, "ROUND_0_TRAINED"),
            TrainingState::RoundFiltered(k) => write!(f, "ROUND_{}_FILTERED", k),
            TrainingState::RoundTrained(k) => write!(f, "ROUND_{}_TRAINED", k),
            TrainingState::FinalDeduplicated => write!(f, "FINAL_DEDUPLICATED"),
            TrainingState::Explained => write!(f, "EXPLAINED"),
        }
    }
}

/// Rows of one cross-validation problem
#[derive(Debug, Clone, Copy)]
pub struct CvData<'a> {
    pub x: &'a [Vec<Option<f64>>],
    pub y: &'a [u8],
    /// Fold of every row
    pub groups: &'a [usize],
    pub features: &'a [String],
}

/// Fold models with their out-of-fold predictions
#[derive(Debug, Clone)]
pub struct FoldFit {
    pub models: Vec<Gbdt>,
    /// Score of every row by the model that did not see its fold
    pub predictions: Vec<f64>,
    pub reports: Vec<FoldReport>,
}

/// Train one model per fold on the other folds' rows accepted by
/// `keep(row, fold)`, and score the held-out fold in full.
///
/// Folds run sequentially.
pub fn fit_folds<F>(
    data: CvData<'_>,
    n_folds: usize,
    params: GbdtParams,
    stage: &str,
    round: Option<usize>,
    keep: F,
) -> PipelineResult<FoldFit>
where
    F: Fn(usize, usize) -> bool,
{
    let mut predictions = vec![f64::NAN; data.x.len()];
    let mut models = Vec::with_capacity(n_folds);
    let mut reports = Vec::with_capacity(n_folds);
    let bar = progress_bar(n_folds as u64, &format!("Training {}", stage));

    for fold in 0..n_folds {
        let train: Vec<usize> = (0..data.x.len())
            .filter(|&i| data.groups[i] != fold && keep(i, fold))
            .collect();
        let test: Vec<usize> = (0..data.x.len()).filter(|&i| data.groups[i] == fold).collect();
        let train_x: Vec<Vec<Option<f64>>> = train.iter().map(|&i| data.x[i].clone()).collect();
        let train_y: Vec<u8> = train.iter().map(|&i| data.y[i]).collect();
        if !train_y.contains(&1) {
            return Err(PipelineError::configuration(format!(
                "{} fold {} has no positive training rows",
                stage, fold
            )));
        }

        let model = Gbdt::fit(&train_x, &train_y, data.features.to_vec(), params)?;
        let test_x: Vec<Vec<Option<f64>>> = test.iter().map(|&i| data.x[i].clone()).collect();
        let test_y: Vec<u8> = test.iter().map(|&i| data.y[i]).collect();
        let scores = model.predict_batch(&test_x);
        for (&i, &score) in test.iter().zip(&scores) {
            predictions[i] = score;
        }

        let metrics = Metrics::compute(&test_y, &scores);
        info!(
            "{} fold {}: {} train / {} test rows, balanced accuracy {:.4}, ROC-AUC {}",
            stage,
            fold,
            train.len(),
            test.len(),
            metrics.balanced_accuracy,
            metrics.roc_auc.map(|v| format!("{:.4}", v)).unwrap_or_else(|| "n/a".to_string())
        );
        reports.push(FoldReport {
            stage: stage.to_string(),
            round,
            fold,
            n_train: train.len(),
            n_test: test.len(),
            params,
            metrics,
        });
        models.push(model);
        bar.inc(1);
    }
    bar.finish_with_message(format!("Training {} done", stage));

    Ok(FoldFit {
        models,
        predictions,
        reports,
    })
}

/// Attributions of every row under the model of its own fold
pub fn explain_out_of_fold(data: CvData<'_>, models: &[Gbdt]) -> Vec<Vec<f64>> {
    data.x
        .par_iter()
        .zip(data.groups.par_iter())
        .map(|(row, &group)| shap::shap_values(&models[group], row))
        .collect()
}

/// Score every row with the model of its own fold
pub fn predict_out_of_fold(x: &[Vec<Option<f64>>], groups: &[usize], models: &[Gbdt]) -> Vec<f64> {
    x.par_iter()
        .zip(groups.par_iter())
        .map(|(row, &group)| models[group].predict_proba(row))
        .collect()
}

/// Index of the best-scoring row of every peptide, in input order. Positive
/// rows outrank negative ones; ties keep the earlier row.
pub fn best_per_peptide(rows: &[FeatureRow], scores: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..rows.len()).collect();
    order.sort_by(|&a, &b| {
        rows[b]
            .label
            .cmp(&rows[a].label)
            .then(scores[b].total_cmp(&scores[a]))
            .then(a.cmp(&b))
    });
    let mut seen = HashSet::new();
    let mut kept: Vec<usize> = order
        .into_iter()
        .filter(|&i| seen.insert(rows[i].peptide.as_str()))
        .collect();
    kept.sort_unstable();
    kept
}

/// `{feature}_shap` columns from per-row attributions
pub fn shap_columns(features: &[String], phis: &[Vec<f64>]) -> Vec<(String, Vec<Option<f64>>)> {
    features
        .iter()
        .enumerate()
        .map(|(j, feature)| {
            (
                format!("{}_shap", feature),
                phis.iter().map(|phi| Some(phi[j])).collect(),
            )
        })
        .collect()
}

pub fn as_column(name: &str, values: impl IntoIterator<Item = f64>) -> (String, Vec<Option<f64>>) {
    (name.to_string(), values.into_iter().map(Some).collect())
}


#[cfg(test)]
mod tests {
    use super::*;

    fn row(peptide: &str, label: u8) -> FeatureRow {
        FeatureRow {
            peptide: peptide.to_string(),
            protein_id: "P".to_string(),
            label,
            values: Vec::new(),
            annotations: Vec::new(),
        }
    }

    #[test]
    fn test_state_transitions() {
        let mut state = TrainingState::RawRows;
        for next in [
            TrainingState::FoldAssigned,
            TrainingState::Round0Trained,
            TrainingState::RoundFiltered(1),
            TrainingState::RoundTrained(1),
            TrainingState::RoundFiltered(2),
            TrainingState::RoundTrained(2),
            TrainingState::FinalDeduplicated,
            TrainingState::Explained,
        ] {
            state.advance(next).unwrap();
        }
        let mut state = TrainingState::Stage1Trained;
        assert!(state.advance(TrainingState::Stage2Trained).is_err());
        assert!(!TrainingState::RoundTrained(1).can_advance_to(TrainingState::RoundFiltered(3)));
        assert_eq!(TrainingState::RoundFiltered(4).to_string(), "ROUND_4_FILTERED");
    }

    #[test]
    fn test_best_per_peptide() {
        let rows = vec![row("A", 0), row("A", 1), row("B", 0), row("B", 0), row("C", 1)];
        let scores = [0.9, 0.2, 0.3, 0.7, 0.5];
        assert_eq!(best_per_peptide(&rows, &scores), vec![1, 3, 4]);
    }

    #[test]
    fn test_fit_folds_predicts_every_row() {
        let x: Vec<Vec<Option<f64>>> = (0..20).map(|i| vec![Some((i % 2) as f64)]).collect();
        let y: Vec<u8> = (0..20).map(|i| (i % 2) as u8).collect();
        let groups: Vec<usize> = (0..20).map(|i| (i / 2) % 2).collect();
        let features = vec!["f".to_string()];
        let data = CvData {
            x: &x,
            y: &y,
            groups: &groups,
            features: &features,
        };
        let params = GbdtParams {
            n_estimators: 3,
            ..Default::default()
        };
        let fit = fit_folds(data, 2, params, "test", None, |_, _| true).unwrap();
        assert_eq!(fit.models.len(), 2);
        assert!(fit.predictions.iter().all(|p| p.is_finite()));
        assert_eq!(fit.reports[0].n_train + fit.reports[0].n_test, 20);

        let phis = explain_out_of_fold(data, &fit.models);
        assert_eq!(phis.len(), 20);
        let again = predict_out_of_fold(&x, &groups, &fit.models);
        assert_eq!(again, fit.predictions);

        let none = fit_folds(data, 2, params, "test", None, |i, _| y[i] == 0);
        assert!(none.is_err());
    }
}
