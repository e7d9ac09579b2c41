//! Bagged Regression Forest
//!
//! A small random forest for tabular regression on per-cycle feature rows.
//! Trees are grown on bootstrap resamples with a random feature subset tried
//! at every split; leaves keep the mean and variance of their targets so the
//! forest can report both a point estimate and its spread.
//!
//! Growth is fully determined by the seed, so the same training rows always
//! yield the same forest.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// A node in a regression tree
#[derive(Serialize, Deserialize, Clone, Debug)]
enum Node {
    /// Internal node: rows with `row[feature] <= threshold` go left
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
    /// Leaf holding the target statistics of the rows that reached it
    Leaf {
        value: f64,
        variance: f64,
        count: usize,
    },
}

impl Node {
    fn predict(&self, row: &[f64]) -> (f64, f64) {
        match self {
            Node::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                let x = row.get(*feature).copied().unwrap_or(0.0);
                if x <= *threshold {
                    left.predict(row)
                } else {
                    right.predict(row)
                }
            }
            Node::Leaf {
                value, variance, ..
            } => (*value, *variance),
        }
    }

    fn depth(&self) -> usize {
        match self {
            Node::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
            Node::Leaf { .. } => 0,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct ForestParams {
    pub num_trees: usize,
    pub max_depth: usize,
    /// Minimum rows on each side of a split
    pub min_leaf: usize,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            num_trees: 16,
            max_depth: 3,
            min_leaf: 2,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RegressionForest {
    trees: Vec<Node>,
    dimensions: usize,
}

impl RegressionForest {
    /// Grow a forest; `None` when there is nothing to learn from
    pub fn fit(
        rows: &[Vec<f64>],
        targets: &[f64],
        params: ForestParams,
        seed: u64,
    ) -> Option<Self> {
        let n = rows.len().min(targets.len());
        if n == 0 || params.num_trees == 0 {
            return None;
        }
        let dimensions = rows[0].len();
        if rows[..n].iter().any(|r| r.len() != dimensions) {
            return None;
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let features_per_split = ((dimensions as f64).sqrt().ceil() as usize).max(1);

        let trees = (0..params.num_trees)
            .map(|_| {
                let sample: Vec<usize> = (0..n).map(|_| rng.random_range(0..n)).collect();
                grow(
                    rows,
                    targets,
                    sample,
                    0,
                    &params,
                    features_per_split,
                    &mut rng,
                )
            })
            .collect();

        Some(Self { trees, dimensions })
    }

    /// Returns (mean prediction, predictive variance)
    ///
    /// Predictive variance combines the average within-leaf variance with the
    /// disagreement between trees.
    pub fn predict(&self, row: &[f64]) -> (f64, f64) {
        let preds: Vec<(f64, f64)> = self.trees.iter().map(|t| t.predict(row)).collect();
        let k = preds.len() as f64;
        let mean = preds.iter().map(|p| p.0).sum::<f64>() / k;
        let within = preds.iter().map(|p| p.1).sum::<f64>() / k;
        let between = preds.iter().map(|p| (p.0 - mean).powi(2)).sum::<f64>() / k;
        (mean, within + between)
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn max_depth(&self) -> usize {
        self.trees.iter().map(Node::depth).max().unwrap_or(0)
    }
}

fn leaf(targets: &[f64], sample: &[usize]) -> Node {
    let count = sample.len();
    let value = sample.iter().map(|&i| targets[i]).sum::<f64>() / count as f64;
    let variance = sample
        .iter()
        .map(|&i| (targets[i] - value).powi(2))
        .sum::<f64>()
        / count as f64;
    Node::Leaf {
        value,
        variance,
        count,
    }
}

fn sse(targets: &[f64], sample: &[usize]) -> f64 {
    if sample.is_empty() {
        return 0.0;
    }
    let mean = sample.iter().map(|&i| targets[i]).sum::<f64>() / sample.len() as f64;
    sample.iter().map(|&i| (targets[i] - mean).powi(2)).sum()
}

fn grow(
    rows: &[Vec<f64>],
    targets: &[f64],
    sample: Vec<usize>,
    depth: usize,
    params: &ForestParams,
    features_per_split: usize,
    rng: &mut StdRng,
) -> Node {
    if depth >= params.max_depth || sample.len() < 2 * params.min_leaf.max(1) {
        return leaf(targets, &sample);
    }

    let parent_sse = sse(targets, &sample);
    if parent_sse <= f64::EPSILON {
        return leaf(targets, &sample);
    }

    let mut features: Vec<usize> = (0..rows[0].len()).collect();
    features.shuffle(rng);
    features.truncate(features_per_split);

    // (feature, threshold, sse)
    let mut best: Option<(usize, f64, f64)> = None;
    for &feature in &features {
        let mut values: Vec<f64> = sample.iter().map(|&i| rows[i][feature]).collect();
        values.sort_by(|a, b| a.total_cmp(b));
        values.dedup();

        for pair in values.windows(2) {
            let threshold = (pair[0] + pair[1]) / 2.0;
            let (left, right): (Vec<usize>, Vec<usize>) =
                sample.iter().partition(|&&i| rows[i][feature] <= threshold);
            if left.len() < params.min_leaf || right.len() < params.min_leaf {
                continue;
            }
            let split_sse = sse(targets, &left) + sse(targets, &right);
            if best.is_none_or(|b| split_sse < b.2) {
                best = Some((feature, threshold, split_sse));
            }
        }
    }

    match best {
        Some((feature, threshold, split_sse)) if split_sse < parent_sse => {
            let (left, right): (Vec<usize>, Vec<usize>) =
                sample.iter().partition(|&&i| rows[i][feature] <= threshold);
            Node::Split {
                feature,
                threshold,
                left: Box::new(grow(
                    rows,
                    targets,
                    left,
                    depth + 1,
                    params,
                    features_per_split,
                    rng,
                )),
                right: Box::new(grow(
                    rows,
                    targets,
                    right,
                    depth + 1,
                    params,
                    features_per_split,
                    rng,
                )),
            }
        }
        _ => leaf(targets, &sample),
    }
}
