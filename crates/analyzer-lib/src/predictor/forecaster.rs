//! Trend forecasting with a ridge + random forest ensemble
//!
//! Both estimators learn the next-period change of the target from the
//! current feature vector. Levels are reconstructed by accumulating predicted
//! changes, so the tree ensemble can follow a trend beyond the training range.
//!
//! Prediction is recursive: each forecast day becomes a synthetic sample in a
//! retained history tail and the features for the following day are rebuilt
//! from it.

use super::features::{compute_features, linear_regression_slope, mean, variance, LONG_WINDOW};
use super::forest::{ForestParams, RandomForest};
use super::linear::RidgeRegression;
use crate::config::AnalysisConfig;
use crate::error::{AnalysisError, Result};
use crate::models::{
    FeatureVector, ForecastPoint, ForecastResult, MetricName, MetricSample, TrendDirection,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::BTreeMap;
use tracing::debug;

/// Model inputs, in encoding order
pub const FEATURE_NAMES: [&str; 12] = [
    "day_of_week",
    "hour",
    "days_since_start",
    "memory_count",
    "api_response_time_ms",
    "cpu_percent",
    "memory_percent",
    "disk_percent",
    "rolling_avg_3",
    "rolling_avg_7",
    "growth_rate_1d",
    "growth_rate_7d",
];

pub const RIDGE: &str = "ridge";
pub const RANDOM_FOREST: &str = "random_forest";

fn encode(fv: &FeatureVector) -> Vec<f64> {
    vec![
        fv.day_of_week as f64,
        fv.hour as f64,
        fv.days_since_start,
        fv.memory_count,
        fv.api_response_time_ms,
        fv.cpu_percent,
        fv.memory_percent,
        fv.disk_percent,
        fv.rolling_avg_3.unwrap_or(fv.target_value),
        fv.rolling_avg_7.unwrap_or(fv.target_value),
        fv.growth_rate_1d.unwrap_or(0.0),
        fv.growth_rate_7d.unwrap_or(0.0),
    ]
}

/// Fitted ensemble plus the state needed for recursive prediction
#[derive(Debug, Clone)]
pub struct TrainedModel {
    target: MetricName,
    ridge: RidgeRegression,
    forest: RandomForest,
    ridge_weight: f64,
    forest_weight: f64,
    accuracy: f64,
    residual_std: f64,
    origin: DateTime<Utc>,
    tail: Vec<MetricSample>,
    last_level: f64,
    training_pairs: usize,
}

impl TrainedModel {
    pub fn target(&self) -> MetricName {
        self.target
    }

    /// Validation accuracy of the blended model, in [0, 1]
    pub fn accuracy(&self) -> f64 {
        self.accuracy
    }

    pub fn training_pairs(&self) -> usize {
        self.training_pairs
    }

    fn blend(&self, row: &[f64]) -> f64 {
        self.ridge_weight * self.ridge.predict(row) + self.forest_weight * self.forest.predict(row)
    }

    fn ensemble_weights(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            (RIDGE.to_string(), self.ridge_weight),
            (RANDOM_FOREST.to_string(), self.forest_weight),
        ])
    }

    /// Blend of per-estimator importances, normalized to sum to 1
    fn feature_importances(&self) -> BTreeMap<String, f64> {
        let ridge = self.ridge.importances();
        let forest = self.forest.importances();
        let mut blended: Vec<f64> = ridge
            .iter()
            .zip(forest)
            .map(|(r, f)| self.ridge_weight * r + self.forest_weight * f)
            .collect();

        let total: f64 = blended.iter().sum();
        if total > f64::EPSILON {
            blended.iter_mut().for_each(|v| *v /= total);
        } else {
            let uniform = 1.0 / blended.len() as f64;
            blended.iter_mut().for_each(|v| *v = uniform);
        }

        FEATURE_NAMES
            .iter()
            .zip(blended)
            .map(|(name, v)| (name.to_string(), v))
            .collect()
    }
}

/// Fits and runs the forecasting ensemble for one target at a time
pub struct TrendForecaster {
    min_complete: usize,
    validation_fraction: f64,
    trend_epsilon: f64,
    confidence_level: f64,
    ridge_lambda: f64,
    forest: ForestParams,
}

impl TrendForecaster {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            min_complete: config.min_data_points.forecast,
            validation_fraction: config.forecast.validation_fraction,
            trend_epsilon: config.forecast.trend_epsilon,
            confidence_level: config.confidence_level,
            ridge_lambda: config.forecast.ridge_lambda,
            forest: ForestParams {
                n_trees: config.forecast.forest_trees,
                max_depth: config.forecast.forest_max_depth,
                min_samples_leaf: config.forecast.forest_min_samples_leaf,
                seed: config.random_seed,
            },
        }
    }

    /// Fit the ensemble on features built for `target`.
    ///
    /// # Errors
    /// * `InsufficientData` when fewer than the configured minimum of complete
    ///   feature vectors are available
    /// * `DegenerateTarget` when the target never changes
    pub fn fit(&self, features: &[FeatureVector], target: MetricName) -> Result<TrainedModel> {
        let stage = format!("forecast:{}", target);
        let complete = features.iter().filter(|fv| fv.is_complete()).count();
        if complete < self.min_complete {
            return Err(AnalysisError::insufficient(stage, complete, self.min_complete));
        }

        let levels: Vec<f64> = features.iter().map(|fv| fv.target_value).collect();
        if variance(&levels) <= f64::EPSILON {
            return Err(AnalysisError::DegenerateTarget(target.to_string()));
        }

        // (features at t, level at t, change to t+1)
        let pairs: Vec<(Vec<f64>, f64, f64)> = features
            .windows(2)
            .filter(|w| w[0].is_complete())
            .map(|w| (encode(&w[0]), w[0].target_value, w[1].target_value - w[0].target_value))
            .collect();
        if pairs.len() < 2 {
            return Err(AnalysisError::insufficient(stage, pairs.len(), 2));
        }

        let n_val = ((pairs.len() as f64 * self.validation_fraction).round() as usize)
            .clamp(1, pairs.len() - 1);
        let (train, validation) = pairs.split_at(pairs.len() - n_val);

        let (train_x, train_y) = unzip_xy(train);
        let ridge = RidgeRegression::fit(&train_x, &train_y, self.ridge_lambda);
        let forest = RandomForest::fit(&train_x, &train_y, &self.forest);

        let actual: Vec<f64> = validation.iter().map(|(_, level, d)| level + d).collect();
        let ridge_levels: Vec<f64> = validation
            .iter()
            .map(|(x, level, _)| level + ridge.predict(x))
            .collect();
        let forest_levels: Vec<f64> = validation
            .iter()
            .map(|(x, level, _)| level + forest.predict(x))
            .collect();

        let ridge_acc = accuracy_score(&actual, &ridge_levels);
        let forest_acc = accuracy_score(&actual, &forest_levels);
        let (ridge_weight, forest_weight) = blend_weights(ridge_acc, forest_acc);

        let blended: Vec<f64> = ridge_levels
            .iter()
            .zip(&forest_levels)
            .map(|(r, f)| ridge_weight * r + forest_weight * f)
            .collect();
        let accuracy = accuracy_score(&actual, &blended);
        let residuals: Vec<f64> = actual.iter().zip(&blended).map(|(a, p)| a - p).collect();
        let residual_std = residual_spread(&residuals);

        debug!(
            target = %target,
            pairs = pairs.len(),
            validation = n_val,
            ridge_accuracy = ridge_acc,
            forest_accuracy = forest_acc,
            accuracy,
            "Forecast ensemble validated"
        );

        let (all_x, all_y) = unzip_xy(&pairs);
        let ridge = RidgeRegression::fit(&all_x, &all_y, self.ridge_lambda);
        let forest = RandomForest::fit(&all_x, &all_y, &self.forest);

        let origin = features[0].timestamp;
        let tail_start = features.len().saturating_sub(LONG_WINDOW);
        let tail = features[tail_start..]
            .iter()
            .map(sample_from_features)
            .collect::<Result<Vec<_>>>()?;
        let last_level = features[features.len() - 1].target_value;

        Ok(TrainedModel {
            target,
            ridge,
            forest,
            ridge_weight,
            forest_weight,
            accuracy,
            residual_std,
            origin,
            tail,
            last_level,
            training_pairs: pairs.len(),
        })
    }

    /// Forecast `horizon_days` daily values after the last observed sample
    pub fn predict(&self, model: &TrainedModel, horizon_days: usize) -> ForecastResult {
        self.predict_at(model, horizon_days, Utc::now())
    }

    /// Same as [`TrendForecaster::predict`] with an explicit generation time
    pub fn predict_at(
        &self,
        model: &TrainedModel,
        horizon_days: usize,
        generated_at: DateTime<Utc>,
    ) -> ForecastResult {
        let z = normal_quantile(0.5 + self.confidence_level / 2.0);
        let mut tail = model.tail.clone();
        let mut level = model.last_level;
        let mut series = Vec::with_capacity(horizon_days);

        let last_ts = tail
            .last()
            .map(|s| s.timestamp)
            .unwrap_or(generated_at);
        let start_date: NaiveDate = last_ts.date_naive();

        for step in 1..=horizon_days {
            let row = compute_features(&tail, model.target, model.origin)
                .last()
                .map(encode);
            let delta = row.map(|r| model.blend(&r)).unwrap_or(0.0);
            level = clamp_level(model.target, level + delta);

            let spread = z * model.residual_std * (step as f64).sqrt();
            series.push(ForecastPoint {
                date: start_date + Duration::days(step as i64),
                value: level,
                lower: clamp_level(model.target, level - spread),
                upper: clamp_level(model.target, level + spread),
            });

            if let Some(last) = tail.last() {
                let next = last.with_value(model.target, level, last.timestamp + Duration::days(1));
                tail.push(next);
                if tail.len() > LONG_WINDOW {
                    tail.remove(0);
                }
            }
        }

        let values: Vec<f64> = series.iter().map(|p| p.value).collect();
        let trend_direction = classify_trend(&values, self.trend_epsilon);

        ForecastResult {
            target_metric: model.target,
            horizon_days,
            predicted_series: series,
            model_accuracy: model.accuracy,
            trend_direction,
            feature_importances: model.feature_importances(),
            ensemble_weights: model.ensemble_weights(),
            generated_at,
        }
    }
}

fn unzip_xy(pairs: &[(Vec<f64>, f64, f64)]) -> (Vec<Vec<f64>>, Vec<f64>) {
    pairs.iter().map(|(x, _, d)| (x.clone(), *d)).unzip()
}

fn sample_from_features(fv: &FeatureVector) -> Result<MetricSample> {
    MetricSample::new(
        fv.timestamp,
        fv.memory_count.max(0.0).round() as u64,
        fv.api_response_time_ms,
        fv.cpu_percent,
        fv.memory_percent,
        fv.disk_percent,
    )
}

fn clamp_level(target: MetricName, value: f64) -> f64 {
    match target {
        MetricName::MemoryCount | MetricName::ApiResponseTimeMs => value.max(0.0),
        MetricName::CpuPercent | MetricName::MemoryPercent | MetricName::DiskPercent => {
            value.clamp(0.0, 100.0)
        }
    }
}

/// R² of predicted levels clamped to [0, 1]; MAE-based when the actual
/// levels are constant.
fn accuracy_score(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    let m = mean(actual);
    let ss_tot: f64 = actual.iter().map(|a| (a - m).powi(2)).sum();
    if ss_tot <= f64::EPSILON {
        let mae = actual
            .iter()
            .zip(predicted)
            .map(|(a, p)| (a - p).abs())
            .sum::<f64>()
            / actual.len() as f64;
        let scale = m.abs().max(1.0);
        return (1.0 - mae / scale).clamp(0.0, 1.0);
    }
    let ss_res: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum();
    (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
}

/// Weights proportional to accuracy; equal when both are zero
fn blend_weights(ridge_acc: f64, forest_acc: f64) -> (f64, f64) {
    let total = ridge_acc + forest_acc;
    if total <= f64::EPSILON {
        return (0.5, 0.5);
    }
    (ridge_acc / total, forest_acc / total)
}

fn residual_spread(residuals: &[f64]) -> f64 {
    match residuals.len() {
        0 => 0.0,
        1 => residuals[0].abs(),
        n => {
            let m = mean(residuals);
            (residuals.iter().map(|r| (r - m).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
        }
    }
}

/// Classify a series by its least-squares slope relative to its magnitude.
///
/// Magnitude is `|values[0]|`, falling back to the mean absolute value and
/// then to 1.0 for an all-zero series.
pub fn classify_trend(values: &[f64], epsilon: f64) -> TrendDirection {
    if values.len() < 2 {
        return TrendDirection::Stable;
    }
    let slope = linear_regression_slope(values);
    let first = values[0].abs();
    let magnitude = if first > f64::EPSILON {
        first
    } else {
        let mean_abs = values.iter().map(|v| v.abs()).sum::<f64>() / values.len() as f64;
        if mean_abs > f64::EPSILON {
            mean_abs
        } else {
            1.0
        }
    };

    let relative = slope / magnitude;
    if relative.abs() < epsilon {
        TrendDirection::Stable
    } else if relative > 0.0 {
        TrendDirection::Increasing
    } else {
        TrendDirection::Decreasing
    }
}

/// Inverse standard normal CDF (Acklam's rational approximation)
pub fn normal_quantile(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e1,
        2.209460984245205e2,
        -2.759285104469687e2,
        1.383577518672690e2,
        -3.066479806614716e1,
        2.506628277459239,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e1,
        1.615858368580409e2,
        -1.556989798598866e2,
        6.680131188771972e1,
        -1.328068155288572e1,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-3,
        -3.223964580411365e-1,
        -2.400758277161838,
        -2.549732539343734,
        4.374664141464968,
        2.938163982698783,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-3,
        3.224671290700398e-1,
        2.445134137142996,
        3.754408661907416,
    ];
    const P_LOW: f64 = 0.02425;

    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    }
}
