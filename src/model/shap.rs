//! Path-dependent TreeSHAP attributions.
//!
//! Each row's attributions, summed with [`expected_value`], reproduce the
//! model's raw margin exactly. Absent features are weighted by the training
//! cover of each branch.

use super::gbdt::Gbdt;
use super::tree::Tree;
use rayon::prelude::*;

#[derive(Debug, Clone, Copy)]
struct PathElement {
    feature: Option<usize>,
    zero_fraction: f64,
    one_fraction: f64,
    weight: f64,
}

fn extend(path: &mut Vec<PathElement>, zero_fraction: f64, one_fraction: f64, feature: Option<usize>) {
    let depth = path.len();
    path.push(PathElement {
        feature,
        zero_fraction,
        one_fraction,
        weight: if depth == 0 { 1.0 } else { 0.0 },
    });
    let scale = (depth + 1) as f64;
    for i in (0..depth).rev() {
        path[i + 1].weight += one_fraction * path[i].weight * (i + 1) as f64 / scale;
        path[i].weight = zero_fraction * path[i].weight * (depth - i) as f64 / scale;
    }
}

fn unwind(path: &mut Vec<PathElement>, index: usize) {
    let depth = path.len() - 1;
    let PathElement {
        zero_fraction: zero,
        one_fraction: one,
        ..
    } = path[index];
    let scale = (depth + 1) as f64;
    let mut next = path[depth].weight;
    for i in (0..depth).rev() {
        if one != 0.0 {
            let tmp = path[i].weight;
            path[i].weight = next * scale / ((i + 1) as f64 * one);
            next = tmp - path[i].weight * zero * (depth - i) as f64 / scale;
        } else {
            path[i].weight = path[i].weight * scale / (zero * (depth - i) as f64);
        }
    }
    for i in index..depth {
        path[i].feature = path[i + 1].feature;
        path[i].zero_fraction = path[i + 1].zero_fraction;
        path[i].one_fraction = path[i + 1].one_fraction;
    }
    path.pop();
}

/// Total weight of the path with element `index` removed
fn unwound_sum(path: &[PathElement], index: usize) -> f64 {
    let depth = path.len() - 1;
    let PathElement {
        zero_fraction: zero,
        one_fraction: one,
        ..
    } = path[index];
    let scale = (depth + 1) as f64;
    let mut next = path[depth].weight;
    let mut total = 0.0;
    for i in (0..depth).rev() {
        if one != 0.0 {
            let tmp = next * scale / ((i + 1) as f64 * one);
            total += tmp;
            next = path[i].weight - tmp * zero * (depth - i) as f64 / scale;
        } else if zero != 0.0 {
            total += path[i].weight / (zero * (depth - i) as f64 / scale);
        }
    }
    total
}

struct Explainer<'a> {
    tree: &'a Tree,
    row: &'a [Option<f64>],
}

impl Explainer<'_> {
    fn recurse(
        &self,
        node: usize,
        phi: &mut [f64],
        mut path: Vec<PathElement>,
        zero_fraction: f64,
        one_fraction: f64,
        feature: Option<usize>,
    ) {
        extend(&mut path, zero_fraction, one_fraction, feature);
        let current = &self.tree.nodes[node];

        let Some(split) = current.feature else {
            for i in 1..path.len() {
                if let Some(f) = path[i].feature {
                    let weight = unwound_sum(&path, i);
                    phi[f] += weight * (path[i].one_fraction - path[i].zero_fraction) * current.value;
                }
            }
            return;
        };

        let hot = current.next(self.row.get(split).copied().flatten());
        let cold = if hot == current.left {
            current.right
        } else {
            current.left
        };
        let (mut incoming_zero, mut incoming_one) = (1.0, 1.0);
        if let Some(k) = (1..path.len()).find(|&k| path[k].feature == Some(split)) {
            incoming_zero = path[k].zero_fraction;
            incoming_one = path[k].one_fraction;
            unwind(&mut path, k);
        }

        let fraction = |child: usize| {
            if current.cover > 0.0 {
                self.tree.nodes[child].cover / current.cover
            } else {
                0.0
            }
        };
        self.recurse(
            hot,
            phi,
            path.clone(),
            incoming_zero * fraction(hot),
            incoming_one,
            Some(split),
        );
        self.recurse(cold, phi, path, incoming_zero * fraction(cold), 0.0, Some(split));
    }
}

/// Add one tree's attributions for `row` into `phi`
pub fn tree_shap(tree: &Tree, row: &[Option<f64>], phi: &mut [f64]) {
    if tree.nodes.is_empty() {
        return;
    }
    let explainer = Explainer { tree, row };
    explainer.recurse(0, phi, Vec::new(), 1.0, 1.0, None);
}

/// Cover-weighted mean output of a tree
pub fn tree_expected_value(tree: &Tree) -> f64 {
    fn below(tree: &Tree, idx: usize) -> f64 {
        let node = &tree.nodes[idx];
        if node.is_leaf() || node.cover <= 0.0 {
            return node.value;
        }
        let (left, right) = (&tree.nodes[node.left], &tree.nodes[node.right]);
        (left.cover * below(tree, node.left) + right.cover * below(tree, node.right)) / node.cover
    }
    if tree.nodes.is_empty() {
        0.0
    } else {
        below(tree, 0)
    }
}

/// Margin of a row with every feature unknown
pub fn expected_value(model: &Gbdt) -> f64 {
    model.base_score + model.trees.iter().map(tree_expected_value).sum::<f64>()
}

/// Attribution of every feature to the margin of `row`
pub fn shap_values(model: &Gbdt, row: &[Option<f64>]) -> Vec<f64> {
    let mut phi = vec![0.0; model.features.len()];
    for tree in &model.trees {
        tree_shap(tree, row, &mut phi);
    }
    phi
}

pub fn explain(model: &Gbdt, rows: &[Vec<Option<f64>>]) -> Vec<Vec<f64>> {
    rows.par_iter().map(|row| shap_values(model, row)).collect()
}
