//! Ridge regression on standardized features
//!
//! Closed-form solve of `(XᵀX + λI)β = Xᵀ(y - ȳ)` with Gaussian elimination.
//! Constant columns are dropped from the solve and get a zero coefficient.

use super::features::mean;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RidgeRegression {
    means: Vec<f64>,
    scales: Vec<f64>,
    coefficients: Vec<f64>,
    intercept: f64,
}

impl RidgeRegression {
    /// Fit on row-major `x` against `y`. An empty input yields the zero model.
    pub fn fit(x: &[Vec<f64>], y: &[f64], lambda: f64) -> Self {
        let n_features = x.first().map(|row| row.len()).unwrap_or(0);
        let intercept = mean(y);

        let mut means = vec![0.0; n_features];
        let mut scales = vec![0.0; n_features];
        for j in 0..n_features {
            let column: Vec<f64> = x.iter().map(|row| row[j]).collect();
            means[j] = mean(&column);
            let var = column.iter().map(|v| (v - means[j]).powi(2)).sum::<f64>()
                / column.len().max(1) as f64;
            scales[j] = var.sqrt();
        }

        let active: Vec<usize> = (0..n_features).filter(|&j| scales[j] > 1e-12).collect();
        let mut coefficients = vec![0.0; n_features];
        if active.is_empty() || x.is_empty() {
            return Self {
                means,
                scales,
                coefficients,
                intercept,
            };
        }

        let standardized: Vec<Vec<f64>> = x
            .iter()
            .map(|row| {
                active
                    .iter()
                    .map(|&j| (row[j] - means[j]) / scales[j])
                    .collect()
            })
            .collect();

        let k = active.len();
        let mut gram = vec![vec![0.0; k]; k];
        let mut rhs = vec![0.0; k];
        for (row, target) in standardized.iter().zip(y) {
            let centered = target - intercept;
            for a in 0..k {
                rhs[a] += row[a] * centered;
                for b in a..k {
                    gram[a][b] += row[a] * row[b];
                }
            }
        }
        for a in 0..k {
            for b in 0..a {
                gram[a][b] = gram[b][a];
            }
            gram[a][a] += lambda;
        }

        match solve(gram, rhs) {
            Some(beta) => {
                for (slot, &j) in active.iter().enumerate() {
                    coefficients[j] = beta[slot];
                }
            }
            None => debug!(features = k, "Singular ridge system, using intercept-only model"),
        }

        Self {
            means,
            scales,
            coefficients,
            intercept,
        }
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        self.intercept
            + self
                .coefficients
                .iter()
                .enumerate()
                .filter(|(j, _)| self.scales[*j] > 1e-12)
                .map(|(j, beta)| beta * (row[j] - self.means[j]) / self.scales[j])
                .sum::<f64>()
    }

    /// Normalized |β| on the standardized scale; all zero when the model is flat
    pub fn importances(&self) -> Vec<f64> {
        let magnitudes: Vec<f64> = self.coefficients.iter().map(|b| b.abs()).collect();
        let total: f64 = magnitudes.iter().sum();
        if total <= f64::EPSILON {
            return vec![0.0; magnitudes.len()];
        }
        magnitudes.iter().map(|m| m / total).collect()
    }
}

/// Gaussian elimination with partial pivoting
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        let pivot_row = a[col].clone();
        let pivot_b = b[col];
        for row in col + 1..n {
            let factor = a[row][col] / pivot_row[col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * pivot_row[k];
            }
            b[row] -= factor * pivot_b;
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Some(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovers_linear_relation() {
        let x: Vec<Vec<f64>> = (0..50).map(|i| vec![i as f64, (i % 7) as f64]).collect();
        let y: Vec<f64> = x.iter().map(|r| 3.0 * r[0] - 2.0 * r[1] + 5.0).collect();
        let model = RidgeRegression::fit(&x, &y, 1e-6);
        for row in &x {
            let expected = 3.0 * row[0] - 2.0 * row[1] + 5.0;
            assert!((model.predict(row) - expected).abs() < 1e-3);
        }
        let imp = model.importances();
        assert!((imp.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(imp[0] > imp[1]);
    }

    #[test]
    fn test_constant_target_gives_flat_model() {
        let x: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64]).collect();
        let y = vec![4.0; 10];
        let model = RidgeRegression::fit(&x, &y, 1.0);
        assert!((model.predict(&[100.0]) - 4.0).abs() < 1e-12);
        assert_eq!(model.importances(), vec![0.0]);
    }

    #[test]
    fn test_constant_column_is_ignored() {
        let x: Vec<Vec<f64>> = (0..10).map(|i| vec![1.0, i as f64]).collect();
        let y: Vec<f64> = (0..10).map(|i| 2.0 * i as f64).collect();
        let model = RidgeRegression::fit(&x, &y, 1e-6);
        assert!((model.predict(&[1.0, 4.0]) - 8.0).abs() < 1e-3);
        assert_eq!(model.importances()[0], 0.0);
    }

    #[test]
    fn test_shrinkage_with_large_lambda() {
        let x: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let model = RidgeRegression::fit(&x, &y, 1e9);
        // Coefficients shrink to zero, leaving the mean
        assert!((model.predict(&[9.0]) - 4.5).abs() < 1e-3);
    }
}
