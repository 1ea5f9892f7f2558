//! Classification metrics over labels and positive-class scores.

use serde::{Deserialize, Serialize};

/// Evaluation of one fold
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Metrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub balanced_accuracy: f64,
    /// Undefined when only one class is present
    pub roc_auc: Option<f64>,
    pub auprc: Option<f64>,
}

impl Metrics {
    /// Threshold-dependent metrics use `score > 0.5`
    pub fn compute(labels: &[u8], scores: &[f64]) -> Self {
        let predictions = threshold(scores, 0.5);
        Self {
            accuracy: accuracy(&predictions, labels),
            precision: precision(&predictions, labels),
            recall: recall(&predictions, labels),
            f1: f1_score(&predictions, labels),
            balanced_accuracy: balanced_accuracy(&predictions, labels),
            roc_auc: roc_auc(labels, scores),
            auprc: auprc(labels, scores),
        }
    }
}

pub fn threshold(scores: &[f64], cutoff: f64) -> Vec<u8> {
    scores.iter().map(|&s| (s > cutoff) as u8).collect()
}

#[derive(Debug, Default, Clone, Copy)]
struct Confusion {
    tp: usize,
    fp: usize,
    tn: usize,
    fn_: usize,
}

fn confusion(predictions: &[u8], labels: &[u8]) -> Confusion {
    let mut c = Confusion::default();
    for (&p, &y) in predictions.iter().zip(labels) {
        match (p == 1, y == 1) {
            (true, true) => c.tp += 1,
            (true, false) => c.fp += 1,
            (false, false) => c.tn += 1,
            (false, true) => c.fn_ += 1,
        }
    }
    c
}

fn ratio(num: usize, den: usize) -> f64 {
    if den > 0 {
        num as f64 / den as f64
    } else {
        0.0
    }
}

pub fn accuracy(predictions: &[u8], labels: &[u8]) -> f64 {
    let c = confusion(predictions, labels);
    ratio(c.tp + c.tn, predictions.len().min(labels.len()))
}

pub fn precision(predictions: &[u8], labels: &[u8]) -> f64 {
    let c = confusion(predictions, labels);
    ratio(c.tp, c.tp + c.fp)
}

pub fn recall(predictions: &[u8], labels: &[u8]) -> f64 {
    let c = confusion(predictions, labels);
    ratio(c.tp, c.tp + c.fn_)
}

pub fn f1_score(predictions: &[u8], labels: &[u8]) -> f64 {
    let p = precision(predictions, labels);
    let r = recall(predictions, labels);
    if p + r > 0.0 {
        2.0 * p * r / (p + r)
    } else {
        0.0
    }
}

/// Mean of the per-class recalls present in `labels`
pub fn balanced_accuracy(predictions: &[u8], labels: &[u8]) -> f64 {
    let c = confusion(predictions, labels);
    let recalls: Vec<f64> = [(c.tp, c.tp + c.fn_), (c.tn, c.tn + c.fp)]
        .into_iter()
        .filter(|&(_, total)| total > 0)
        .map(|(hit, total)| ratio(hit, total))
        .collect();
    if recalls.is_empty() {
        0.0
    } else {
        recalls.iter().sum::<f64>() / recalls.len() as f64
    }
}

/// Rank-based area under the ROC curve, ties sharing their mean rank
pub fn roc_auc(labels: &[u8], scores: &[f64]) -> Option<f64> {
    let n_pos = labels.iter().filter(|&&y| y == 1).count();
    let n_neg = labels.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut rank_sum = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let mean_rank = (i + j) as f64 / 2.0 + 1.0;
        rank_sum += order[i..=j]
            .iter()
            .filter(|&&idx| labels[idx] == 1)
            .count() as f64
            * mean_rank;
        i = j + 1;
    }
    let n_pos = n_pos as f64;
    Some((rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg as f64))
}

/// Area under the precision-recall curve by the trapezoidal rule, one point
/// per distinct score
pub fn auprc(labels: &[u8], scores: &[f64]) -> Option<f64> {
    let n_pos = labels.iter().filter(|&&y| y == 1).count();
    if n_pos == 0 {
        return None;
    }
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let (mut tp, mut fp) = (0usize, 0usize);
    let (mut prev_recall, mut prev_precision) = (0.0, 1.0);
    let mut area = 0.0;
    let mut i = 0;
    while i < order.len() {
        let score = scores[order[i]];
        while i < order.len() && scores[order[i]] == score {
            if labels[order[i]] == 1 {
                tp += 1;
            } else {
                fp += 1;
            }
            i += 1;
        }
        let recall = ratio(tp, n_pos);
        let precision = ratio(tp, tp + fp);
        area += (recall - prev_recall) * (precision + prev_precision) / 2.0;
        prev_recall = recall;
        prev_precision = precision;
    }
    Some(area)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_threshold_metrics() {
        let predictions = [1, 0, 1, 0, 1];
        let labels = [1, 0, 0, 0, 1];
        assert_relative_eq!(accuracy(&predictions, &labels), 0.8);
        assert_relative_eq!(precision(&predictions, &labels), 2.0 / 3.0);
        assert_relative_eq!(recall(&predictions, &labels), 1.0);
        assert_relative_eq!(f1_score(&predictions, &labels), 0.8);
        assert_relative_eq!(balanced_accuracy(&predictions, &labels), (1.0 + 2.0 / 3.0) / 2.0);
    }

    #[test]
    fn test_balanced_accuracy_single_class() {
        assert_relative_eq!(balanced_accuracy(&[1, 0], &[1, 1]), 0.5);
        assert_relative_eq!(balanced_accuracy(&[], &[]), 0.0);
    }

    #[test]
    fn test_roc_auc() {
        assert_relative_eq!(roc_auc(&[0, 0, 1, 1], &[0.1, 0.2, 0.8, 0.9]).unwrap(), 1.0);
        assert_relative_eq!(roc_auc(&[1, 1, 0, 0], &[0.1, 0.2, 0.8, 0.9]).unwrap(), 0.0);
        assert_relative_eq!(roc_auc(&[0, 1], &[0.5, 0.5]).unwrap(), 0.5);
        assert_relative_eq!(roc_auc(&[0, 1, 0, 1], &[0.1, 0.3, 0.35, 0.8]).unwrap(), 0.75);
        assert_eq!(roc_auc(&[1, 1], &[0.1, 0.2]), None);
    }

    #[test]
    fn test_auprc() {
        assert_relative_eq!(auprc(&[0, 0, 1, 1], &[0.1, 0.2, 0.8, 0.9]).unwrap(), 1.0);
        assert_eq!(auprc(&[0, 0], &[0.1, 0.2]), None);
        let area = auprc(&[1, 0, 1, 0], &[0.9, 0.8, 0.7, 0.1]).unwrap();
        assert!(area > 0.5 && area < 1.0);
    }

    #[test]
    fn test_compute() {
        let metrics = Metrics::compute(&[0, 1, 1, 0], &[0.2, 0.9, 0.6, 0.7]);
        assert_relative_eq!(metrics.accuracy, 0.75);
        assert_relative_eq!(metrics.roc_auc.unwrap(), 0.75);
    }
}
