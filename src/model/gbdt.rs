//! Gradient-boosted trees with logistic loss.

use super::tree::Tree;
use crate::error::{PipelineError, PipelineResult};
use crate::utils::random::seeded_rng;
use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Booster hyperparameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GbdtParams {
    /// Shrinkage applied to every leaf
    pub learning_rate: f64,
    pub max_depth: usize,
    /// Minimum hessian sum on each side of a split
    pub min_child_weight: f64,
    /// Minimum loss reduction of a split
    pub gamma: f64,
    /// Fraction of features sampled for each tree
    pub colsample_bytree: f64,
    pub n_estimators: usize,
    /// L2 regularization of leaf weights
    pub lambda: f64,
    pub seed: u64,
}

impl Default for GbdtParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.3,
            max_depth: 6,
            min_child_weight: 1.0,
            gamma: 0.0,
            colsample_bytree: 1.0,
            n_estimators: 100,
            lambda: 1.0,
            seed: 42,
        }
    }
}

impl GbdtParams {
    pub fn validate(&self) -> PipelineResult<()> {
        if !(self.colsample_bytree > 0.0 && self.colsample_bytree <= 1.0) {
            return Err(PipelineError::configuration(format!(
                "colsample_bytree must be in (0, 1], got {}",
                self.colsample_bytree
            )));
        }
        if self.learning_rate <= 0.0 || self.lambda < 0.0 || self.gamma < 0.0 {
            return Err(PipelineError::configuration(
                "learning_rate must be positive, lambda and gamma non-negative",
            ));
        }
        Ok(())
    }
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Binary classifier: an additive ensemble of regression trees on the logit
/// scale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gbdt {
    pub params: GbdtParams,
    /// Margin every prediction starts from
    pub base_score: f64,
    /// Feature names, in column order of the rows the model was fitted on
    pub features: Vec<String>,
    pub trees: Vec<Tree>,
}

impl Gbdt {
    /// Fit `params.n_estimators` trees on rows `x` with labels `y` (0 or 1)
    pub fn fit(
        x: &[Vec<Option<f64>>],
        y: &[u8],
        features: Vec<String>,
        params: GbdtParams,
    ) -> PipelineResult<Self> {
        params.validate()?;
        if x.len() != y.len() {
            return Err(PipelineError::input_shape(format!(
                "{} rows but {} labels",
                x.len(),
                y.len()
            )));
        }
        if x.is_empty() {
            return Err(PipelineError::configuration("cannot fit on an empty table"));
        }
        if let Some(row) = x.iter().find(|row| row.len() != features.len()) {
            return Err(PipelineError::input_shape(format!(
                "row has {} values, expected {}",
                row.len(),
                features.len()
            )));
        }

        let n_features = features.len();
        let n_sampled = ((params.colsample_bytree * n_features as f64).ceil() as usize)
            .clamp(1, n_features.max(1));
        let mut rng = seeded_rng(params.seed);
        let base_score = 0.0;
        let mut margin = vec![base_score; x.len()];
        let mut trees = Vec::with_capacity(params.n_estimators);

        for round in 0..params.n_estimators {
            let (grad, hess): (Vec<f64>, Vec<f64>) = margin
                .iter()
                .zip(y)
                .map(|(&m, &label)| {
                    let p = sigmoid(m);
                    (p - label as f64, (p * (1.0 - p)).max(1e-16))
                })
                .unzip();

            let mut columns: Vec<usize> = if n_sampled < n_features {
                rand::seq::index::sample(&mut rng, n_features, n_sampled).into_vec()
            } else {
                (0..n_features).collect()
            };
            columns.sort_unstable();

            let tree = Tree::fit(x, &grad, &hess, &columns, &params);
            for (m, row) in margin.iter_mut().zip(x) {
                *m += tree.predict(row);
            }
            debug!("Tree {}: {} nodes", round, tree.nodes.len());
            trees.push(tree);
        }

        Ok(Self {
            params,
            base_score,
            features,
            trees,
        })
    }

    /// Raw logit of one row
    pub fn predict_margin(&self, row: &[Option<f64>]) -> f64 {
        self.base_score + self.trees.iter().map(|tree| tree.predict(row)).sum::<f64>()
    }

    /// Probability of the positive class
    pub fn predict_proba(&self, row: &[Option<f64>]) -> f64 {
        sigmoid(self.predict_margin(row))
    }

    pub fn predict_batch(&self, rows: &[Vec<Option<f64>>]) -> Vec<f64> {
        rows.par_iter().map(|row| self.predict_proba(row)).collect()
    }

    /// Mean split gain per feature, normalized to sum to one. Features never
    /// split on get zero.
    pub fn feature_importance(&self) -> Vec<f64> {
        let mut total = vec![0.0; self.features.len()];
        let mut count = vec![0usize; self.features.len()];
        for node in self.trees.iter().flat_map(|tree| &tree.nodes) {
            if let Some(feature) = node.feature {
                total[feature] += node.gain;
                count[feature] += 1;
            }
        }
        let mean: Vec<f64> = total
            .iter()
            .zip(&count)
            .map(|(&t, &c)| if c > 0 { t / c as f64 } else { 0.0 })
            .collect();
        let sum: f64 = mean.iter().sum();
        if sum > 0.0 {
            mean.iter().map(|m| m / sum).collect()
        } else {
            mean
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string(self).context("Failed to serialize model")?;
        std::fs::write(path, json).with_context(|| format!("Failed to write model {:?}", path))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read model {:?}", path))?;
        serde_json::from_str(&json).with_context(|| format!("Failed to parse model {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    /// Positives have a high first feature; the second is noise
    fn separable(n: usize) -> (Vec<Vec<Option<f64>>>, Vec<u8>) {
        let mut rng = seeded_rng(9);
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..n {
            let label = (i % 2) as u8;
            let signal = label as f64 * 2.0 + rng.gen::<f64>();
            let noise = if i % 7 == 0 { None } else { Some(rng.gen::<f64>()) };
            x.push(vec![Some(signal), noise]);
            y.push(label);
        }
        (x, y)
    }

    fn names() -> Vec<String> {
        vec!["signal".to_string(), "noise".to_string()]
    }

    #[test]
    fn test_fit_separates_classes() {
        let (x, y) = separable(200);
        let params = GbdtParams {
            n_estimators: 20,
            ..Default::default()
        };
        let model = Gbdt::fit(&x, &y, names(), params).unwrap();
        let scores = model.predict_batch(&x);
        for (score, label) in scores.iter().zip(&y) {
            assert_eq!(*score > 0.5, *label == 1);
        }
        let importance = model.feature_importance();
        assert!(importance[0] > importance[1]);
        assert!((importance.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_fit_is_deterministic() {
        let (x, y) = separable(60);
        let params = GbdtParams {
            n_estimators: 5,
            colsample_bytree: 0.5,
            ..Default::default()
        };
        let a = Gbdt::fit(&x, &y, names(), params).unwrap();
        let b = Gbdt::fit(&x, &y, names(), params).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_shape_errors() {
        let x = vec![vec![Some(1.0)]];
        assert!(Gbdt::fit(&x, &[1, 0], names(), GbdtParams::default()).is_err());
        assert!(Gbdt::fit(&x, &[1], names(), GbdtParams::default()).is_err());
        assert!(Gbdt::fit(&[], &[], names(), GbdtParams::default()).is_err());
        let bad = GbdtParams {
            colsample_bytree: 0.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let (x, y) = separable(40);
        let params = GbdtParams {
            n_estimators: 3,
            ..Default::default()
        };
        let model = Gbdt::fit(&x, &y, names(), params).unwrap();
        let path = dir.path().join("clf_test_0.json");
        model.save(&path).unwrap();
        let loaded = Gbdt::load(&path).unwrap();
        assert_eq!(loaded.features, model.features);
        approx::assert_relative_eq!(
            loaded.predict_margin(&x[3]),
            model.predict_margin(&x[3]),
            epsilon = 1e-9
        );
    }
}
