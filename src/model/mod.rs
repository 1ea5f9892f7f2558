//! Boosted-tree classifier, its attributions and persisted artifacts.

pub mod checkpoint;
pub mod gbdt;
pub mod metrics;
pub mod shap;
pub mod tree;

pub use checkpoint::{FoldReport, ModelStore, RunReport};
pub use gbdt::{Gbdt, GbdtParams};
pub use metrics::Metrics;

use crate::data::{FeatureRow, FeatureSchema};
use crate::error::PipelineResult;

/// Values of `features` for every row, in feature order
pub fn design_matrix<'a>(
    schema: &FeatureSchema,
    rows: impl IntoIterator<Item = &'a FeatureRow>,
    features: &[String],
) -> PipelineResult<Vec<Vec<Option<f64>>>> {
    let indices = schema.indices_of(features)?;
    Ok(rows
        .into_iter()
        .map(|row| indices.iter().map(|&i| row.values[i]).collect())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_design_matrix_projects_columns() {
        let schema = FeatureSchema::new(
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
            Vec::new(),
        );
        let row = FeatureRow {
            peptide: "PEPTIDE".to_string(),
            protein_id: "P1".to_string(),
            label: 1,
            values: vec![Some(1.0), None, Some(3.0)],
            annotations: Vec::new(),
        };
        let x = design_matrix(&schema, [&row], &["c".to_string(), "b".to_string()]).unwrap();
        assert_eq!(x, vec![vec![Some(3.0), None]]);
        assert!(design_matrix(&schema, [&row], &["z".to_string()]).is_err());
    }
}
