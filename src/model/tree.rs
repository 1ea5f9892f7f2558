//! Regression trees fitted to second-order gradient statistics.
//!
//! Nodes live in a flat array with child indices. A split sends a sample left
//! when its value is below the threshold; a null value follows the split's
//! learned default direction.

use super::GbdtParams;
use serde::{Deserialize, Serialize};

/// Node of a [`Tree`]; a node without a feature is a leaf
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub feature: Option<usize>,
    pub threshold: f64,
    pub left: usize,
    pub right: usize,
    /// Direction taken by null values
    pub default_left: bool,
    /// Leaf output, already scaled by the learning rate
    pub value: f64,
    /// Sum of hessians of the training rows reaching this node
    pub cover: f64,
    /// Loss reduction of the split
    pub gain: f64,
}

impl Node {
    fn leaf(value: f64, cover: f64) -> Self {
        Self {
            feature: None,
            threshold: 0.0,
            left: 0,
            right: 0,
            default_left: false,
            value,
            cover,
            gain: 0.0,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.feature.is_none()
    }

    /// Child reached by `value`
    pub fn next(&self, value: Option<f64>) -> usize {
        let left = match value {
            Some(v) => v < self.threshold,
            None => self.default_left,
        };
        if left {
            self.left
        } else {
            self.right
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, Copy)]
struct Split {
    feature: usize,
    threshold: f64,
    default_left: bool,
    gain: f64,
}

/// Gradient sums of the rows routed left by one candidate split
#[derive(Debug, Clone, Copy)]
struct Candidate {
    grad_left: f64,
    hess_left: f64,
    threshold: f64,
    default_left: bool,
}

fn score(grad: f64, hess: f64, lambda: f64) -> f64 {
    grad * grad / (hess + lambda)
}

impl Tree {
    /// Fit one tree on `rows` of `x` using only the columns in `features`
    pub(crate) fn fit(
        x: &[Vec<Option<f64>>],
        grad: &[f64],
        hess: &[f64],
        features: &[usize],
        params: &GbdtParams,
    ) -> Self {
        let mut tree = Tree { nodes: Vec::new() };
        let rows: Vec<usize> = (0..x.len()).collect();
        tree.grow(x, grad, hess, features, params, rows, 0);
        tree
    }

    #[allow(clippy::too_many_arguments)]
    fn grow(
        &mut self,
        x: &[Vec<Option<f64>>],
        grad: &[f64],
        hess: &[f64],
        features: &[usize],
        params: &GbdtParams,
        rows: Vec<usize>,
        depth: usize,
    ) -> usize {
        let g: f64 = rows.iter().map(|&r| grad[r]).sum();
        let h: f64 = rows.iter().map(|&r| hess[r]).sum();
        let idx = self.nodes.len();
        let weight = -g / (h + params.lambda) * params.learning_rate;
        self.nodes.push(Node::leaf(weight, h));
        if depth >= params.max_depth || rows.len() < 2 {
            return idx;
        }
        let Some(split) = best_split(x, grad, hess, features, params, &rows, g, h) else {
            return idx;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.into_iter().partition(|&r| {
                match x[r][split.feature] {
                    Some(v) => v < split.threshold,
                    None => split.default_left,
                }
            });
        let left = self.grow(x, grad, hess, features, params, left_rows, depth + 1);
        let right = self.grow(x, grad, hess, features, params, right_rows, depth + 1);
        self.nodes[idx] = Node {
            feature: Some(split.feature),
            threshold: split.threshold,
            left,
            right,
            default_left: split.default_left,
            value: 0.0,
            cover: h,
            gain: split.gain,
        };
        idx
    }

    /// Index of the leaf `row` falls into
    pub fn leaf_index(&self, row: &[Option<f64>]) -> usize {
        let mut idx = 0;
        while let Some(feature) = self.nodes[idx].feature {
            idx = self.nodes[idx].next(row.get(feature).copied().flatten());
        }
        idx
    }

    pub fn predict(&self, row: &[Option<f64>]) -> f64 {
        self.nodes[self.leaf_index(row)].value
    }

    pub fn depth(&self) -> usize {
        fn depth_from(nodes: &[Node], idx: usize) -> usize {
            let node = &nodes[idx];
            if node.is_leaf() {
                0
            } else {
                1 + depth_from(nodes, node.left).max(depth_from(nodes, node.right))
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            depth_from(&self.nodes, 0)
        }
    }
}

/// Exact greedy search over every feature value boundary, trying both
/// directions for null values
#[allow(clippy::too_many_arguments)]
fn best_split(
    x: &[Vec<Option<f64>>],
    grad: &[f64],
    hess: &[f64],
    features: &[usize],
    params: &GbdtParams,
    rows: &[usize],
    g: f64,
    h: f64,
) -> Option<Split> {
    let parent = score(g, h, params.lambda);
    let mut best: Option<Split> = None;

    for &feature in features {
        let mut present: Vec<(f64, f64, f64)> = rows
            .iter()
            .filter_map(|&r| x[r][feature].map(|v| (v, grad[r], hess[r])))
            .collect();
        if present.is_empty() {
            continue;
        }
        present.sort_by(|a, b| a.0.total_cmp(&b.0));
        let g_present: f64 = present.iter().map(|p| p.1).sum();
        let h_present: f64 = present.iter().map(|p| p.2).sum();
        let (g_missing, h_missing) = (g - g_present, h - h_present);
        let has_missing = present.len() < rows.len();

        let mut candidates = Vec::new();
        if has_missing {
            // Nulls alone on the left
            candidates.push(Candidate {
                grad_left: g_missing,
                hess_left: h_missing,
                threshold: present[0].0,
                default_left: true,
            });
        }
        let (mut gl, mut hl) = (0.0, 0.0);
        for pair in present.windows(2) {
            gl += pair[0].1;
            hl += pair[0].2;
            if pair[0].0 == pair[1].0 {
                continue;
            }
            let threshold = (pair[0].0 + pair[1].0) / 2.0;
            candidates.push(Candidate {
                grad_left: gl,
                hess_left: hl,
                threshold,
                default_left: false,
            });
            if has_missing {
                candidates.push(Candidate {
                    grad_left: gl + g_missing,
                    hess_left: hl + h_missing,
                    threshold,
                    default_left: true,
                });
            }
        }

        for candidate in candidates {
            let (gl, hl) = (candidate.grad_left, candidate.hess_left);
            let (gr, hr) = (g - gl, h - hl);
            if hl < params.min_child_weight || hr < params.min_child_weight {
                continue;
            }
            let gain = 0.5 * (score(gl, hl, params.lambda) + score(gr, hr, params.lambda) - parent);
            if gain - params.gamma <= 1e-12 {
                continue;
            }
            if best.map_or(true, |b| gain > b.gain) {
                best = Some(Split {
                    feature,
                    threshold: candidate.threshold,
                    default_left: candidate.default_left,
                    gain,
                });
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn params(max_depth: usize) -> GbdtParams {
        GbdtParams {
            max_depth,
            learning_rate: 1.0,
            min_child_weight: 0.0,
            ..Default::default()
        }
    }

    /// Gradients of logistic loss at margin 0
    fn stats(labels: &[u8]) -> (Vec<f64>, Vec<f64>) {
        let grad = labels.iter().map(|&y| 0.5 - y as f64).collect();
        let hess = vec![0.25; labels.len()];
        (grad, hess)
    }

    #[test]
    fn test_single_split_separates_classes() {
        let x: Vec<Vec<Option<f64>>> = [1.0, 2.0, 3.0, 10.0, 11.0, 12.0]
            .iter()
            .map(|v| vec![Some(*v), Some(0.0)])
            .collect();
        let labels = [0, 0, 0, 1, 1, 1];
        let (grad, hess) = stats(&labels);
        let tree = Tree::fit(&x, &grad, &hess, &[0, 1], &params(1));

        assert_eq!(tree.nodes.len(), 3);
        let root = &tree.nodes[0];
        assert_eq!(root.feature, Some(0));
        assert_relative_eq!(root.threshold, 6.5);
        assert!(tree.predict(&x[0]) < 0.0);
        assert!(tree.predict(&x[5]) > 0.0);
        let (left, right) = (&tree.nodes[root.left], &tree.nodes[root.right]);
        assert_relative_eq!(left.cover + right.cover, root.cover);
    }

    #[test]
    fn test_nulls_learn_default_direction() {
        let x = vec![
            vec![Some(1.0)],
            vec![Some(2.0)],
            vec![None],
            vec![None],
            vec![Some(3.0)],
            vec![Some(4.0)],
        ];
        let labels = [0, 0, 1, 1, 0, 0];
        let (grad, hess) = stats(&labels);
        let tree = Tree::fit(&x, &grad, &hess, &[0], &params(1));

        let root = &tree.nodes[0];
        assert!(root.default_left);
        assert_relative_eq!(root.threshold, 1.0);
        assert!(tree.predict(&[None]) > 0.0);
        assert!(tree.predict(&[Some(2.5)]) < 0.0);
    }

    #[test]
    fn test_depth_limit_and_pure_node() {
        let x: Vec<Vec<Option<f64>>> = (0..8).map(|i| vec![Some(i as f64)]).collect();
        let labels = [0, 1, 0, 1, 0, 1, 0, 1];
        let (grad, hess) = stats(&labels);
        assert!(Tree::fit(&x, &grad, &hess, &[0], &params(2)).depth() <= 2);

        let same = vec![vec![Some(1.0)]; 4];
        let (grad, hess) = stats(&[0, 1, 0, 1]);
        let stump = Tree::fit(&same, &grad, &hess, &[0], &params(3));
        assert_eq!(stump.nodes.len(), 1);
    }

    #[test]
    fn test_gamma_prunes_weak_splits() {
        let x: Vec<Vec<Option<f64>>> = (0..4).map(|i| vec![Some(i as f64)]).collect();
        let (grad, hess) = stats(&[0, 0, 1, 1]);
        let strict = GbdtParams {
            gamma: 100.0,
            ..params(3)
        };
        assert_eq!(Tree::fit(&x, &grad, &hess, &[0], &strict).nodes.len(), 1);
    }

    #[test]
    fn test_min_child_weight_blocks_small_children() {
        let x: Vec<Vec<Option<f64>>> = (0..4).map(|i| vec![Some(i as f64)]).collect();
        let (grad, hess) = stats(&[1, 0, 0, 0]);
        let heavy = GbdtParams {
            min_child_weight: 0.5,
            ..params(3)
        };
        let tree = Tree::fit(&x, &grad, &hess, &[0], &heavy);
        for node in tree.nodes.iter().filter(|n| n.is_leaf()) {
            assert!(node.cover >= 0.5);
        }
    }
}
