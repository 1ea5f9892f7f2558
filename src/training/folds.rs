//! Seeded cross-validation group assignment.

use crate::error::{PipelineError, PipelineResult};
use crate::utils::random::seeded_rng;
use rand::seq::SliceRandom;
use std::collections::{BTreeMap, BTreeSet};

/// Partitions keys into `n_folds` groups: sort, shuffle with the seed, then
/// assign `position % n_folds`.
#[derive(Debug, Clone, Copy)]
pub struct CVGroupAssigner {
    n_folds: usize,
    seed: u64,
}

impl CVGroupAssigner {
    pub fn new(n_folds: usize, seed: u64) -> PipelineResult<Self> {
        if n_folds < 2 {
            return Err(PipelineError::configuration(format!(
                "cross-validation needs at least 2 folds, got {}",
                n_folds
            )));
        }
        Ok(Self { n_folds, seed })
    }

    pub fn n_folds(&self) -> usize {
        self.n_folds
    }

    /// Fold of every distinct key. The result depends only on the key set
    /// and the seed, never on input order or duplicates.
    pub fn assign<K, I>(&self, keys: I) -> BTreeMap<K, usize>
    where
        K: Ord + Clone,
        I: IntoIterator<Item = K>,
    {
        let mut unique: Vec<K> = keys.into_iter().collect::<BTreeSet<K>>().into_iter().collect();
        let mut rng = seeded_rng(self.seed);
        unique.shuffle(&mut rng);
        unique
            .into_iter()
            .enumerate()
            .map(|(position, key)| (key, position % self.n_folds))
            .collect()
    }

    /// Fold of each item, keyed by `key`
    pub fn groups<T, K, F>(&self, items: &[T], key: F) -> Vec<usize>
    where
        K: Ord + Clone,
        F: Fn(&T) -> K,
    {
        let folds = self.assign(items.iter().map(&key));
        items.iter().map(|item| folds[&key(item)]).collect()
    }

    /// Positive and negative keys are shuffled separately so both classes
    /// spread evenly over the folds. A key present in both keeps its positive
    /// fold.
    pub fn assign_stratified<K, P, N>(&self, positives: P, negatives: N) -> BTreeMap<K, usize>
    where
        K: Ord + Clone,
        P: IntoIterator<Item = K>,
        N: IntoIterator<Item = K>,
    {
        let mut folds = self.assign(negatives);
        folds.extend(self.assign(positives));
        folds
    }

    /// Stratified fold of each item, keyed by `key`
    pub fn groups_stratified<T, K, F, L>(&self, items: &[T], key: F, label: L) -> Vec<usize>
    where
        K: Ord + Clone,
        F: Fn(&T) -> K,
        L: Fn(&T) -> u8,
    {
        let folds = self.assign_stratified(
            items.iter().filter(|item| label(*item) == 1).map(&key),
            items.iter().filter(|item| label(*item) != 1).map(&key),
        );
        items.iter().map(|item| folds[&key(item)]).collect()
    }
}

/// Fail unless every fold holds at least one positive row
pub fn check_positives(labels: &[u8], groups: &[usize], n_folds: usize) -> PipelineResult<()> {
    let mut positives = vec![0usize; n_folds];
    for (&label, &group) in labels.iter().zip(groups) {
        if label == 1 {
            positives[group] += 1;
        }
    }
    match positives.iter().position(|&count| count == 0) {
        Some(fold) => Err(PipelineError::configuration(format!(
            "fold {} has no positive rows",
            fold
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("PEP{:03}", i)).collect()
    }

    #[test]
    fn test_assignment_is_a_partition() {
        let assigner = CVGroupAssigner::new(10, 42).unwrap();
        let folds = assigner.assign(keys(95));
        assert_eq!(folds.len(), 95);
        let mut sizes = vec![0; 10];
        for fold in folds.values() {
            sizes[*fold] += 1;
        }
        assert!(sizes.iter().all(|&s| s == 9 || s == 10));
    }

    #[test]
    fn test_assignment_ignores_order_and_duplicates() {
        let assigner = CVGroupAssigner::new(4, 7).unwrap();
        let forward = assigner.assign(keys(30));
        let mut shuffled = keys(30);
        shuffled.reverse();
        shuffled.extend(keys(5));
        assert_eq!(assigner.assign(shuffled), forward);
    }

    #[test]
    fn test_seed_changes_assignment() {
        let a = CVGroupAssigner::new(5, 1).unwrap().assign(keys(50));
        let b = CVGroupAssigner::new(5, 2).unwrap().assign(keys(50));
        assert_ne!(a, b);
    }

    #[test]
    fn test_rows_sharing_a_key_share_a_fold() {
        let rows = vec![("P1", 1), ("P2", 0), ("P1", 0), ("P3", 1), ("P2", 1)];
        let assigner = CVGroupAssigner::new(2, 42).unwrap();
        let groups = assigner.groups(&rows, |row| row.0.to_string());
        assert_eq!(groups[0], groups[2]);
        assert_eq!(groups[1], groups[4]);
    }

    #[test]
    fn test_stratified_assignment_spreads_both_classes() {
        let assigner = CVGroupAssigner::new(3, 42).unwrap();
        let rows: Vec<(String, u8)> = (0..9)
            .map(|i| (format!("POS{}", i), 1))
            .chain((0..9).map(|i| (format!("NEG{}", i), 0)))
            .chain(std::iter::once(("POS0".to_string(), 0)))
            .collect();
        let groups = assigner.groups_stratified(&rows, |r| r.0.clone(), |r| r.1);
        let mut positives = vec![0; 3];
        for (row, group) in rows.iter().zip(&groups).take(9) {
            assert_eq!(row.1, 1);
            positives[*group] += 1;
        }
        assert_eq!(positives, vec![3, 3, 3]);
        assert_eq!(groups[18], groups[0]);
        let labels: Vec<u8> = rows.iter().map(|r| r.1).collect();
        assert!(check_positives(&labels, &groups, 3).is_ok());
    }

    #[test]
    fn test_check_positives() {
        assert!(check_positives(&[1, 0, 1, 0], &[0, 0, 1, 1], 2).is_ok());
        let err = check_positives(&[1, 0, 0, 0], &[0, 0, 1, 1], 2).unwrap_err();
        assert!(err.to_string().contains("fold 1"));
        assert!(CVGroupAssigner::new(1, 42).is_err());
    }
}
