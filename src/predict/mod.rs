//! Scoring of multi-mapped peptides with the saved fold models.

use crate::config::PipelineConfig;
use crate::data::loader::write_feature_rows;
use crate::data::preprocessing::{load_tables, training_files};
use crate::data::{FeatureRow, FeatureTable};
use crate::error::{PipelineError, PipelineResult};
use crate::model::{design_matrix, Gbdt, ModelStore};
use crate::training::trainer::ScoredRows;
use crate::utils::format_number;
use anyhow::Result;
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub fn mm_scored_path(output_folder: &Path) -> PathBuf {
    output_folder.join("mm_scored.csv")
}

/// Score every row with each fold model and their mean.
///
/// Rows come back sorted by `meanScore`, best first, keeping only the first
/// row of each peptide. Columns are `score_{fold}` then `meanScore`.
pub fn score_table(table: &FeatureTable, models: &[Gbdt]) -> PipelineResult<ScoredRows> {
    let Some(first) = models.first() else {
        return Err(PipelineError::configuration("no models to score with"));
    };
    if let Some(other) = models.iter().find(|m| m.features != first.features) {
        return Err(PipelineError::input_shape(format!(
            "fold models disagree on features: {:?} vs {:?}",
            first.features, other.features
        )));
    }
    let rows = table.rows();
    let x = design_matrix(&table.schema, rows, &first.features)?;
    let per_model: Vec<Vec<f64>> = models.iter().map(|m| m.predict_batch(&x)).collect();
    let mean: Vec<f64> = (0..rows.len())
        .into_par_iter()
        .map(|i| per_model.iter().map(|s| s[i]).sum::<f64>() / models.len() as f64)
        .collect();

    let mut order: Vec<usize> = (0..rows.len()).collect();
    order.sort_by(|&a, &b| mean[b].total_cmp(&mean[a]).then(a.cmp(&b)));
    let mut seen = HashSet::new();
    let kept: Vec<usize> = order
        .into_iter()
        .filter(|&i| seen.insert(rows[i].peptide.as_str()))
        .collect();

    let mut columns: Vec<(String, Vec<Option<f64>>)> = per_model
        .iter()
        .enumerate()
        .map(|(fold, scores)| {
            (
                format!("score_{}", fold),
                kept.iter().map(|&i| Some(scores[i])).collect(),
            )
        })
        .collect();
    columns.push((
        "meanScore".to_string(),
        kept.iter().map(|&i| Some(mean[i])).collect(),
    ));
    let rows: Vec<FeatureRow> = kept.iter().map(|&i| rows[i].clone()).collect();
    Ok(ScoredRows { rows, columns })
}

/// Score the multi-mapped tables of the configured model and write
/// `mm_scored.csv`. Returns `None` when there is nothing to score.
pub fn run_scoring(config: &PipelineConfig) -> Result<Option<ScoredRows>> {
    let dir = config.multi_mapped_dir();
    let files = training_files(config, &dir)?;
    if files.is_empty() {
        warn!("No multi-mapped tables in {:?}", dir);
        return Ok(None);
    }
    let schema = config.model.schema(&config.extra_features());
    let table = load_tables(&files, &schema)?;
    if table.is_empty() {
        warn!("Multi-mapped tables in {:?} are empty", dir);
        return Ok(None);
    }

    let store = ModelStore::new(config.models_dir())?;
    let models = store.load_all(config.model.model_key())?;
    info!(
        "Scoring {} multi-mapped rows with {} {} models",
        format_number(table.len()),
        models.len(),
        config.model
    );
    let scored = score_table(&table, &models)?;

    let path = mm_scored_path(&config.output_folder);
    write_feature_rows(&path, &table.schema, &scored.rows, &scored.columns)?;
    info!("Saved {} scored peptides to {:?}", format_number(scored.rows.len()), path);
    Ok(Some(scored))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::FeatureSchema;
    use crate::model::GbdtParams;

    fn table() -> FeatureTable {
        let schema = FeatureSchema::new(vec!["signal".to_string()], Vec::new());
        let mut table = FeatureTable::new(schema);
        for (peptide, protein, signal) in [
            ("AAA", "P1", 0.1),
            ("BBB", "P1", 0.9),
            ("AAA", "P2", 0.8),
            ("CCC", "P3", 0.5),
        ] {
            table
                .push(FeatureRow {
                    peptide: peptide.to_string(),
                    protein_id: protein.to_string(),
                    label: 1,
                    values: vec![Some(signal)],
                    annotations: Vec::new(),
                })
                .unwrap();
        }
        table
    }

    fn models() -> Vec<Gbdt> {
        let x: Vec<Vec<Option<f64>>> = (0..40).map(|i| vec![Some(i as f64 / 40.0)]).collect();
        let y: Vec<u8> = (0..40).map(|i| (i >= 20) as u8).collect();
        (0..3)
            .map(|k| {
                let params = GbdtParams {
                    n_estimators: 5 + k,
                    ..Default::default()
                };
                Gbdt::fit(&x, &y, vec!["signal".to_string()], params).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_scores_are_averaged_and_deduplicated() {
        let scored = score_table(&table(), &models()).unwrap();
        let peptides: Vec<&str> = scored.rows.iter().map(|r| r.peptide.as_str()).collect();
        assert_eq!(peptides.len(), 3);
        assert_eq!(peptides[2], "CCC");
        let aaa = scored.rows.iter().find(|r| r.peptide == "AAA").unwrap();
        assert_eq!(aaa.protein_id, "P2");

        let mean = scored.column("meanScore").unwrap();
        assert!(mean.windows(2).all(|w| w[0] >= w[1]));
        for i in 0..scored.rows.len() {
            let folds: f64 = (0..3)
                .map(|k| scored.column(&format!("score_{}", k)).unwrap()[i].unwrap())
                .sum();
            approx::assert_relative_eq!(folds / 3.0, mean[i].unwrap(), epsilon = 1e-12);
        }
    }

    #[test]
    fn test_scoring_needs_models() {
        assert!(score_table(&table(), &[]).is_err());
        let mut models = models();
        models[1].features = vec!["other".to_string()];
        assert!(score_table(&table(), &models).is_err());
    }
}
