//! Isolation forest outlier scoring
//!
//! Points that are isolated by few random axis-aligned splits are anomalous.
//! Scores follow `s(x) = 2^(-E[h(x)] / c(ψ))` where `ψ` is the subsample size.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};

const EULER_GAMMA: f64 = 0.577_215_664_9;

#[derive(Debug, Clone)]
enum IsolationNode {
    External {
        size: usize,
    },
    Internal {
        feature: usize,
        split: f64,
        left: Box<IsolationNode>,
        right: Box<IsolationNode>,
    },
}

#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<IsolationNode>,
    subsample: usize,
}

impl IsolationForest {
    /// Grow `n_trees` trees on subsamples of `data` drawn without replacement.
    pub fn fit(data: &[Vec<f64>], n_trees: usize, sample_size: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let subsample = sample_size.min(data.len()).max(1);
        let height_limit = (subsample as f64).log2().ceil() as usize;

        let trees = if data.is_empty() {
            Vec::new()
        } else {
            (0..n_trees.max(1))
                .map(|_| {
                    let rows = index::sample(&mut rng, data.len(), subsample).into_vec();
                    build_tree(data, rows, 0, height_limit, &mut rng)
                })
                .collect()
        };

        Self { trees, subsample }
    }

    /// Anomaly score in (0, 1]; around 0.5 or below is normal
    pub fn score(&self, point: &[f64]) -> f64 {
        let c = average_path_length(self.subsample);
        if self.trees.is_empty() || c <= 0.0 {
            return 0.5;
        }
        let mean_depth = self
            .trees
            .iter()
            .map(|tree| path_length(tree, point, 0))
            .sum::<f64>()
            / self.trees.len() as f64;
        2.0_f64.powf(-mean_depth / c)
    }
}

fn build_tree(
    data: &[Vec<f64>],
    rows: Vec<usize>,
    depth: usize,
    height_limit: usize,
    rng: &mut StdRng,
) -> IsolationNode {
    if depth >= height_limit || rows.len() <= 1 {
        return IsolationNode::External { size: rows.len() };
    }

    // Only features that still vary within this node can split it
    let n_features = data[rows[0]].len();
    let splittable: Vec<(usize, f64, f64)> = (0..n_features)
        .filter_map(|f| {
            let (min, max) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
                (lo.min(data[r][f]), hi.max(data[r][f]))
            });
            (max - min > 1e-10).then_some((f, min, max))
        })
        .collect();

    if splittable.is_empty() {
        return IsolationNode::External { size: rows.len() };
    }

    let (feature, min, max) = splittable[rng.random_range(0..splittable.len())];
    let split = rng.random_range(min..max);
    let (left, right): (Vec<usize>, Vec<usize>) =
        rows.into_iter().partition(|&r| data[r][feature] < split);

    IsolationNode::Internal {
        feature,
        split,
        left: Box::new(build_tree(data, left, depth + 1, height_limit, rng)),
        right: Box::new(build_tree(data, right, depth + 1, height_limit, rng)),
    }
}

fn path_length(node: &IsolationNode, point: &[f64], depth: usize) -> f64 {
    match node {
        IsolationNode::External { size } => depth as f64 + average_path_length(*size),
        IsolationNode::Internal {
            feature,
            split,
            left,
            right,
        } => {
            if point[*feature] < *split {
                path_length(left, point, depth + 1)
            } else {
                path_length(right, point, depth + 1)
            }
        }
    }
}

/// Average path length of an unsuccessful BST search over `n` points
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_with_outlier() -> Vec<Vec<f64>> {
        let mut data: Vec<Vec<f64>> = (0..100)
            .map(|i| vec![10.0 + (i % 10) as f64 * 0.1, 20.0 + (i / 10) as f64 * 0.1])
            .collect();
        data.push(vec![50.0, 80.0]);
        data
    }

    #[test]
    fn test_outlier_scores_higher() {
        let data = cluster_with_outlier();
        let forest = IsolationForest::fit(&data, 100, 256, 42);
        let inlier = forest.score(&[10.5, 20.5]);
        let outlier = forest.score(&[50.0, 80.0]);
        assert!(outlier > inlier, "outlier {} inlier {}", outlier, inlier);
        assert!(outlier > 0.6);
    }

    #[test]
    fn test_scores_are_deterministic_for_seed() {
        let data = cluster_with_outlier();
        let a = IsolationForest::fit(&data, 50, 64, 7);
        let b = IsolationForest::fit(&data, 50, 64, 7);
        for point in &data {
            assert_eq!(a.score(point), b.score(point));
        }
    }

    #[test]
    fn test_constant_data_scores_uniformly() {
        let data = vec![vec![1.0, 1.0]; 20];
        let forest = IsolationForest::fit(&data, 10, 16, 1);
        let s = forest.score(&[1.0, 1.0]);
        assert!(s > 0.0 && s <= 1.0);
        assert_eq!(s, forest.score(&[1.0, 1.0]));
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        // c(256) ≈ 10.24
        assert!((average_path_length(256) - 10.24).abs() < 0.01);
    }
}
