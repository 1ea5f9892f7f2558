//! Iterative self-training of the spliced model.
//!
//! Round 0 trains on every occurrence row. Each later round collapses rows to
//! the best-scoring occurrence per peptide, then trains each fold on those
//! rows minus the positives whose previous-round score fell to or below the
//! retention quantile of that fold's training scores. A positive dropped from
//! a fold never returns to it, and background rows are never dropped. Every
//! round scores the complete, unfiltered held-out fold.

use crate::data::{FeatureRow, FeatureTable, ModelKind};
use crate::model::design_matrix;
use crate::training::folds::check_positives;
use crate::training::trainer::{ScoredRows, Trainer, TrainingResult};
use crate::training::{
    as_column, best_per_peptide, explain_out_of_fold, fit_folds, shap_columns, CvData,
    TrainingState,
};
use crate::utils::format_duration;
use crate::utils::stats::quantile;
use anyhow::Result;
use std::collections::HashSet;
use std::time::Instant;
use tracing::info;

/// Outcome of one fold's filtering step
#[derive(Debug, Clone, PartialEq)]
pub struct Retention {
    pub fold: usize,
    pub cutoff: Option<f64>,
    pub positives_kept: usize,
    pub positives_dropped: usize,
}

/// Drop, per fold, the positive peptides among `candidates` whose score is at
/// or below the `percentile` quantile of the fold's retained training scores.
///
/// `dropped[fold]` only grows.
pub fn update_retention(
    rows: &[FeatureRow],
    candidates: &[usize],
    groups: &[usize],
    scores: &[f64],
    percentile: f64,
    dropped: &mut [HashSet<String>],
) -> Vec<Retention> {
    dropped
        .iter_mut()
        .enumerate()
        .map(|(fold, dropped)| {
            let training: Vec<usize> = candidates
                .iter()
                .copied()
                .filter(|&i| groups[i] != fold)
                .filter(|&i| rows[i].label == 0 || !dropped.contains(&rows[i].peptide))
                .collect();
            let training_scores: Vec<f64> = training.iter().map(|&i| scores[i]).collect();
            let cutoff = quantile(&training_scores, percentile);
            let mut kept = 0;
            let mut removed = 0;
            for &i in training.iter().filter(|&&i| rows[i].label == 1) {
                match cutoff {
                    Some(cutoff) if scores[i] <= cutoff => {
                        dropped.insert(rows[i].peptide.clone());
                        removed += 1;
                    }
                    _ => kept += 1,
                }
            }
            Retention {
                fold,
                cutoff,
                positives_kept: kept,
                positives_dropped: removed,
            }
        })
        .collect()
}

impl Trainer<'_> {
    /// Self-training of the spliced model; final fold models are saved as
    /// `spliced`
    pub fn train_self_training(&self, table: &FeatureTable) -> Result<TrainingResult> {
        let start_time = Instant::now();
        let n_folds = self.config.n_folds;
        let rows = table.rows();
        let x = design_matrix(&table.schema, rows, &self.features)?;
        let y: Vec<u8> = rows.iter().map(|r| r.label).collect();
        let mut state = TrainingState::RawRows;
        info!(
            "Self-training on {} rows ({} positive), {} rounds",
            rows.len(),
            table.positive_count(),
            self.config.self_training_rounds
        );

        let assigner = self.assigner()?;
        let groups = assigner.groups_stratified(rows, |r| r.peptide.clone(), |r| r.label);
        check_positives(&y, &groups, n_folds)?;
        state.advance(TrainingState::FoldAssigned)?;

        let data = CvData {
            x: &x,
            y: &y,
            groups: &groups,
            features: &self.features,
        };
        let params = self.search(data, "spliced round 0")?;
        let mut fit = self
            .pool
            .install(|| fit_folds(data, n_folds, params, "spliced", Some(0), |_, _| true))?;
        let first_predictions = fit.predictions.clone();
        let mut reports = fit.reports.clone();
        state.advance(TrainingState::Round0Trained)?;

        let mut dropped: Vec<HashSet<String>> = vec![HashSet::new(); n_folds];
        for round in 1..=self.config.self_training_rounds {
            let unique_idx = best_per_peptide(rows, &fit.predictions);
            let retention = update_retention(
                rows,
                &unique_idx,
                &groups,
                &fit.predictions,
                self.config.retention_percentile,
                &mut dropped,
            );
            for r in &retention {
                info!(
                    "Round {} fold {}: cutoff {}, {} positives kept, {} dropped",
                    round,
                    r.fold,
                    r.cutoff.map(|c| format!("{:.4}", c)).unwrap_or_else(|| "n/a".to_string()),
                    r.positives_kept,
                    r.positives_dropped
                );
            }
            state.advance(TrainingState::RoundFiltered(round))?;

            let unique_x: Vec<Vec<Option<f64>>> = unique_idx.iter().map(|&i| x[i].clone()).collect();
            let unique_y: Vec<u8> = unique_idx.iter().map(|&i| y[i]).collect();
            let unique_groups: Vec<usize> = unique_idx.iter().map(|&i| groups[i]).collect();
            let params = self.search(
                CvData {
                    x: &unique_x,
                    y: &unique_y,
                    groups: &unique_groups,
                    features: &self.features,
                },
                &format!("spliced round {}", round),
            )?;

            let mut in_unique = vec![false; rows.len()];
            for &i in &unique_idx {
                in_unique[i] = true;
            }
            let keep = |i: usize, fold: usize| {
                in_unique[i] && (y[i] == 0 || !dropped[fold].contains(&rows[i].peptide))
            };
            fit = self
                .pool
                .install(|| fit_folds(data, n_folds, params, "spliced", Some(round), keep))?;
            reports.extend(fit.reports.iter().cloned());
            state.advance(TrainingState::RoundTrained(round))?;
        }

        for (fold, model) in fit.models.iter().enumerate() {
            self.store.save(ModelKind::Spliced.model_key(), fold, model)?;
        }

        let unique_idx = best_per_peptide(rows, &fit.predictions);
        let unique_rows: Vec<FeatureRow> = unique_idx.iter().map(|&i| rows[i].clone()).collect();
        info!("Final deduplication kept {} of {} rows", unique_rows.len(), rows.len());
        state.advance(TrainingState::FinalDeduplicated)?;

        let unique_x: Vec<Vec<Option<f64>>> = unique_idx.iter().map(|&i| x[i].clone()).collect();
        let unique_y: Vec<u8> = unique_idx.iter().map(|&i| y[i]).collect();
        let unique_groups: Vec<usize> = unique_idx.iter().map(|&i| groups[i]).collect();
        let unique_data = CvData {
            x: &unique_x,
            y: &unique_y,
            groups: &unique_groups,
            features: &self.features,
        };
        let phis = self.pool.install(|| explain_out_of_fold(unique_data, &fit.models));
        state.advance(TrainingState::Explained)?;

        let mut unique_columns = vec![
            as_column("cvGroup", unique_groups.iter().map(|&g| g as f64)),
            as_column("prediction_xgb0", unique_idx.iter().map(|&i| first_predictions[i])),
            as_column("prediction", unique_idx.iter().map(|&i| fit.predictions[i])),
        ];
        unique_columns.extend(shap_columns(&self.features, &phis));
        let all_columns = vec![
            as_column("cvGroup", groups.iter().map(|&g| g as f64)),
            as_column("prediction_xgb0", first_predictions.iter().copied()),
            as_column("prediction", fit.predictions.iter().copied()),
        ];

        let duration_secs = start_time.elapsed().as_secs_f64();
        info!("Self-training finished in {}", format_duration(duration_secs));
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
            importances: fit.models.iter().map(|m| m.feature_importance()).collect(),
            duration_secs,
        })
    }
}
