//! Seeded random forest of CART regression trees
//!
//! Each tree is grown on a bootstrap sample with a random feature subset per
//! split (`ceil(d / 3)` features). Split quality is the reduction in squared error; the accumulated
//! reductions give impurity-based feature importances.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};

/// Forest hyperparameters
#[derive(Debug, Clone)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub seed: u64,
}

#[derive(Debug, Clone)]
enum Node {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn predict(&self, row: &[f64]) -> f64 {
        match self {
            Node::Leaf(value) => *value,
            Node::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                if row[*feature] <= *threshold {
                    left.predict(row)
                } else {
                    right.predict(row)
                }
            }
        }
    }
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
}

#[derive(Debug, Clone)]
pub struct RandomForest {
    trees: Vec<Node>,
    importances: Vec<f64>,
}

struct TreeBuilder<'a> {
    x: &'a [Vec<f64>],
    y: &'a [f64],
    params: &'a ForestParams,
    max_features: usize,
    importances: Vec<f64>,
}

impl RandomForest {
    pub fn fit(x: &[Vec<f64>], y: &[f64], params: &ForestParams) -> Self {
        let n_features = x.first().map(|row| row.len()).unwrap_or(0);
        if x.is_empty() {
            return Self {
                trees: vec![Node::Leaf(0.0)],
                importances: vec![0.0; n_features],
            };
        }

        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut builder = TreeBuilder {
            x,
            y,
            params,
            max_features: n_features.div_ceil(3).max(1),
            importances: vec![0.0; n_features],
        };

        let n = x.len();
        let trees = (0..params.n_trees.max(1))
            .map(|_| {
                let bootstrap: Vec<usize> = (0..n).map(|_| rng.random_range(0..n)).collect();
                builder.grow(bootstrap, 0, &mut rng)
            })
            .collect();

        let total: f64 = builder.importances.iter().sum();
        let importances = if total > f64::EPSILON {
            builder.importances.iter().map(|v| v / total).collect()
        } else {
            vec![0.0; n_features]
        };

        Self { trees, importances }
    }

    /// Mean of the per-tree predictions
    pub fn predict(&self, row: &[f64]) -> f64 {
        self.trees.iter().map(|t| t.predict(row)).sum::<f64>() / self.trees.len() as f64
    }

    /// Normalized impurity reduction per feature; all zero when no split was made
    pub fn importances(&self) -> &[f64] {
        &self.importances
    }
}

impl TreeBuilder<'_> {
    fn grow(&mut self, rows: Vec<usize>, depth: usize, rng: &mut StdRng) -> Node {
        let leaf_value = rows.iter().map(|&r| self.y[r]).sum::<f64>() / rows.len() as f64;
        if depth >= self.params.max_depth || rows.len() < 2 * self.params.min_samples_leaf.max(1) {
            return Node::Leaf(leaf_value);
        }

        // Random feature order; the first `max_features` are tried, and later ones
        // only while no valid split has been found.
        let n_features = self.importances.len();
        let order = index::sample(rng, n_features, n_features).into_vec();
        let mut best: Option<BestSplit> = None;
        for (tried, feature) in order.into_iter().enumerate() {
            if tried >= self.max_features && best.is_some() {
                break;
            }
            if let Some(candidate) = self.best_split(&rows, feature) {
                if best.as_ref().map_or(true, |b| candidate.gain > b.gain) {
                    best = Some(candidate);
                }
            }
        }

        let Some(split) = best else {
            return Node::Leaf(leaf_value);
        };

        self.importances[split.feature] += split.gain;
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&r| self.x[r][split.feature] <= split.threshold);

        Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left: Box::new(self.grow(left_rows, depth + 1, rng)),
            right: Box::new(self.grow(right_rows, depth + 1, rng)),
        }
    }

    /// Best threshold on one feature by squared-error reduction
    fn best_split(&self, rows: &[usize], feature: usize) -> Option<BestSplit> {
        let mut sorted: Vec<(f64, f64)> = rows
            .iter()
            .map(|&r| (self.x[r][feature], self.y[r]))
            .collect();
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

        let n = sorted.len();
        let total_sum: f64 = sorted.iter().map(|(_, y)| y).sum();
        let total_sq: f64 = sorted.iter().map(|(_, y)| y * y).sum();
        let parent_sse = total_sq - total_sum * total_sum / n as f64;
        let min_leaf = self.params.min_samples_leaf.max(1);

        let mut best: Option<BestSplit> = None;
        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        for i in 0..n - 1 {
            let (value, target) = sorted[i];
            left_sum += target;
            left_sq += target * target;

            let left_n = i + 1;
            let right_n = n - left_n;
            if left_n < min_leaf || right_n < min_leaf {
                continue;
            }
            let next_value = sorted[i + 1].0;
            if next_value <= value {
                continue;
            }

            let right_sum = total_sum - left_sum;
            let right_sq = total_sq - left_sq;
            let sse = (left_sq - left_sum * left_sum / left_n as f64)
                + (right_sq - right_sum * right_sum / right_n as f64);
            let gain = parent_sse - sse;
            if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                best = Some(BestSplit {
                    feature,
                    threshold: (value + next_value) / 2.0,
                    gain,
                });
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(seed: u64) -> ForestParams {
        ForestParams {
            n_trees: 30,
            max_depth: 6,
            min_samples_leaf: 2,
            seed,
        }
    }

    #[test]
    fn test_learns_step_function() {
        let x: Vec<Vec<f64>> = (0..60).map(|i| vec![i as f64, (i % 5) as f64, 1.0]).collect();
        let y: Vec<f64> = (0..60).map(|i| if i < 30 { 0.0 } else { 10.0 }).collect();
        let forest = RandomForest::fit(&x, &y, &params(7));

        assert!(forest.predict(&[5.0, 0.0, 1.0]) < 2.0);
        assert!(forest.predict(&[55.0, 0.0, 1.0]) > 8.0);

        let imp = forest.importances();
        assert!((imp.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(imp[0] > imp[1]);
        assert_eq!(imp[2], 0.0);
    }

    #[test]
    fn test_same_seed_same_model() {
        let x: Vec<Vec<f64>> = (0..40).map(|i| vec![i as f64, ((i * 7) % 11) as f64]).collect();
        let y: Vec<f64> = x.iter().map(|r| r[0] * 0.5 + r[1]).collect();
        let a = RandomForest::fit(&x, &y, &params(42));
        let b = RandomForest::fit(&x, &y, &params(42));
        for row in &x {
            assert_eq!(a.predict(row), b.predict(row));
        }
        assert_eq!(a.importances(), b.importances());
    }

    #[test]
    fn test_constant_target_is_leaf_only() {
        let x: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64]).collect();
        let y = vec![3.5; 20];
        let forest = RandomForest::fit(&x, &y, &params(1));
        assert!((forest.predict(&[100.0]) - 3.5).abs() < 1e-12);
        assert_eq!(forest.importances(), &[0.0]);
    }
}
