//! Randomized hyperparameter search with group-aware cross-validation.

use crate::error::PipelineResult;
use crate::model::metrics::{balanced_accuracy, threshold};
use crate::model::{Gbdt, GbdtParams};
use crate::utils::random::seeded_rng;
use rayon::prelude::*;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Candidate values of every searched hyperparameter
#[derive(Debug, Clone)]
pub struct SearchSpace {
    pub learning_rate: Vec<f64>,
    pub max_depth: Vec<usize>,
    pub min_child_weight: Vec<f64>,
    pub gamma: Vec<f64>,
    pub colsample_bytree: Vec<f64>,
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self {
            learning_rate: vec![0.1, 0.15, 0.2, 0.3],
            max_depth: (2..=7).collect(),
            min_child_weight: vec![1.0, 2.0, 3.0],
            gamma: vec![0.0, 0.1, 0.2, 0.3],
            colsample_bytree: vec![0.5, 0.7, 0.9, 0.95],
        }
    }
}

impl SearchSpace {
    pub fn size(&self) -> usize {
        self.learning_rate.len()
            * self.max_depth.len()
            * self.min_child_weight.len()
            * self.gamma.len()
            * self.colsample_bytree.len()
    }

    /// Grid point `index`, other fields taken from `base`
    pub fn params_at(&self, index: usize, base: &GbdtParams) -> GbdtParams {
        let mut rest = index;
        let mut pick = |len: usize| {
            let i = rest % len;
            rest /= len;
            i
        };
        let learning_rate = self.learning_rate[pick(self.learning_rate.len())];
        let max_depth = self.max_depth[pick(self.max_depth.len())];
        let min_child_weight = self.min_child_weight[pick(self.min_child_weight.len())];
        let gamma = self.gamma[pick(self.gamma.len())];
        let colsample_bytree = self.colsample_bytree[pick(self.colsample_bytree.len())];
        GbdtParams {
            learning_rate,
            max_depth,
            min_child_weight,
            gamma,
            colsample_bytree,
            ..*base
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub params: GbdtParams,
    pub score: f64,
    pub evaluated: usize,
}

/// Mean balanced accuracy over leave-one-group-out splits
pub fn cross_val_score(
    x: &[Vec<Option<f64>>],
    y: &[u8],
    groups: &[usize],
    features: &[String],
    params: GbdtParams,
) -> PipelineResult<f64> {
    let distinct: BTreeSet<usize> = groups.iter().copied().collect();
    let mut scores = Vec::with_capacity(distinct.len());
    for held_out in distinct {
        let (mut train_x, mut train_y, mut test_x, mut test_y) = (Vec::new(), Vec::new(), Vec::new(), Vec::new());
        for ((row, &label), &group) in x.iter().zip(y).zip(groups) {
            if group == held_out {
                test_x.push(row.clone());
                test_y.push(label);
            } else {
                train_x.push(row.clone());
                train_y.push(label);
            }
        }
        if train_x.is_empty() {
            continue;
        }
        let model = Gbdt::fit(&train_x, &train_y, features.to_vec(), params)?;
        let predicted = threshold(&model.predict_batch(&test_x), 0.5);
        scores.push(balanced_accuracy(&predicted, &test_y));
    }
    Ok(if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    })
}

/// Samples `n_iter` distinct grid points and keeps the best-scoring one. The
/// base parameters are always scored first and win ties.
pub struct RandomizedSearch {
    pub space: SearchSpace,
    pub n_iter: usize,
    pub seed: u64,
}

impl RandomizedSearch {
    pub fn new(n_iter: usize, seed: u64) -> Self {
        Self {
            space: SearchSpace::default(),
            n_iter,
            seed,
        }
    }

    pub fn candidates(&self, base: &GbdtParams) -> Vec<GbdtParams> {
        let size = self.space.size();
        let mut rng = seeded_rng(self.seed);
        let mut candidates = vec![*base];
        candidates.extend(
            rand::seq::index::sample(&mut rng, size, self.n_iter.min(size))
                .into_iter()
                .map(|index| self.space.params_at(index, base)),
        );
        candidates
    }

    pub fn run(
        &self,
        x: &[Vec<Option<f64>>],
        y: &[u8],
        groups: &[usize],
        features: &[String],
        base: &GbdtParams,
    ) -> PipelineResult<SearchResult> {
        let candidates = self.candidates(base);
        let scores = candidates
            .par_iter()
            .map(|params| cross_val_score(x, y, groups, features, *params))
            .collect::<PipelineResult<Vec<f64>>>()?;

        let mut best = 0;
        for (i, score) in scores.iter().enumerate() {
            debug!("Candidate {}: balanced accuracy {:.4} {:?}", i, score, candidates[i]);
            if *score > scores[best] {
                best = i;
            }
        }
        if best == 0 {
            info!("Search kept the default parameters ({:.4})", scores[0]);
        } else {
            info!(
                "Search improved balanced accuracy {:.4} -> {:.4}",
                scores[0], scores[best]
            );
        }
        Ok(SearchResult {
            params: candidates[best],
            score: scores[best],
            evaluated: candidates.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_grid_decoding_covers_space() {
        let space = SearchSpace::default();
        assert_eq!(space.size(), 4 * 6 * 3 * 4 * 4);
        let base = GbdtParams::default();
        let distinct: HashSet<String> = (0..space.size())
            .map(|i| format!("{:?}", space.params_at(i, &base)))
            .collect();
        assert_eq!(distinct.len(), space.size());
        let first = space.params_at(0, &base);
        assert_eq!(first.learning_rate, 0.1);
        assert_eq!(first.max_depth, 2);
        assert_eq!(first.n_estimators, base.n_estimators);
    }

    #[test]
    fn test_candidates_start_with_base_and_are_reproducible() {
        let search = RandomizedSearch::new(10, 42);
        let base = GbdtParams::default();
        let candidates = search.candidates(&base);
        assert_eq!(candidates.len(), 11);
        assert_eq!(candidates[0], base);
        let again = search.candidates(&base);
        assert_eq!(candidates, again);
    }

    #[test]
    fn test_search_returns_a_candidate() {
        let mut x = Vec::new();
        let mut y = Vec::new();
        let mut groups = Vec::new();
        for i in 0..40 {
            let label = (i % 2) as u8;
            x.push(vec![Some(label as f64 + (i % 5) as f64 * 0.1)]);
            y.push(label);
            groups.push(i % 4);
        }
        let base = GbdtParams {
            n_estimators: 5,
            ..Default::default()
        };
        let search = RandomizedSearch::new(3, 42);
        let result = search.run(&x, &y, &groups, &["f".to_string()], &base).unwrap();
        assert_eq!(result.evaluated, 4);
        assert_eq!(result.score, 1.0);
        assert_eq!(result.params, base);
    }
}
