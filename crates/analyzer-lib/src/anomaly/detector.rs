//! Outlier detection over feature vectors
//!
//! The isolation forest is retrained on every run. Its decision boundary is
//! the `(1 - contamination)` quantile of the training scores. Hard threshold
//! breaches are reported even when the model does not flag the point.

use super::isolation_forest::IsolationForest;
use crate::config::{AlertThresholds, AnalysisConfig, AnomalyConfig};
use crate::error::{AnalysisError, Result};
use crate::models::{AnomalyCategory, AnomalyEvent, FeatureVector, MetricSnapshot};
use chrono::{DateTime, Utc};
use tracing::debug;

/// Detector inputs, in encoding order
pub const DETECTOR_FEATURES: [&str; 6] = [
    "api_response_time_ms",
    "cpu_percent",
    "memory_percent",
    "disk_percent",
    "growth_rate_1d",
    "target_deviation",
];

fn encode(fv: &FeatureVector) -> Vec<f64> {
    let deviation = fv
        .rolling_avg_7
        .filter(|avg| avg.abs() > f64::EPSILON)
        .map(|avg| (fv.target_value - avg) / avg)
        .unwrap_or(0.0);
    vec![
        fv.api_response_time_ms,
        fv.cpu_percent,
        fv.memory_percent,
        fv.disk_percent,
        fv.growth_rate_1d.unwrap_or(0.0),
        deviation,
    ]
}

/// Isolation forest plus its calibrated decision boundary
#[derive(Debug, Clone)]
pub struct TrainedDetector {
    forest: IsolationForest,
    threshold: f64,
    training_points: usize,
}

impl TrainedDetector {
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn training_points(&self) -> usize {
        self.training_points
    }

    pub fn score(&self, fv: &FeatureVector) -> f64 {
        self.forest.score(&encode(fv))
    }
}

pub struct AnomalyDetector {
    contamination: f64,
    min_points: usize,
    seed: u64,
    model: AnomalyConfig,
    thresholds: AlertThresholds,
}

impl AnomalyDetector {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            contamination: config.anomaly_threshold,
            min_points: config.min_data_points.anomaly,
            seed: config.random_seed,
            model: config.anomaly.clone(),
            thresholds: config.thresholds.clone(),
        }
    }

    /// Train the isolation forest and calibrate its decision boundary.
    pub fn fit(&self, features: &[FeatureVector]) -> Result<TrainedDetector> {
        if features.len() < self.min_points {
            return Err(AnalysisError::insufficient(
                "anomalies",
                features.len(),
                self.min_points,
            ));
        }

        let data: Vec<Vec<f64>> = features.iter().map(encode).collect();
        let forest = IsolationForest::fit(
            &data,
            self.model.trees,
            self.model.sample_size,
            self.seed,
        );
        let scores: Vec<f64> = data.iter().map(|row| forest.score(row)).collect();
        let threshold = quantile(&scores, 1.0 - self.contamination);

        debug!(
            points = data.len(),
            threshold,
            contamination = self.contamination,
            "Isolation forest calibrated"
        );

        Ok(TrainedDetector {
            forest,
            threshold,
            training_points: data.len(),
        })
    }

    /// Score every vector and return the flagged ones in input order.
    ///
    /// # Arguments
    /// * `detector` - model from [`AnomalyDetector::fit`]
    /// * `features` - vectors to check, usually the training set itself
    /// * `detected_at` - stamped on every event; the orchestrator passes run start
    pub fn detect(
        &self,
        detector: &TrainedDetector,
        features: &[FeatureVector],
        detected_at: DateTime<Utc>,
    ) -> Vec<AnomalyEvent> {
        features
            .iter()
            .filter_map(|fv| {
                let score = detector.score(fv);
                let flagged = score > detector.threshold;
                if !flagged && !self.breaches_hard_threshold(fv) {
                    return None;
                }
                Some(AnomalyEvent {
                    detected_at,
                    source_sample_timestamp: fv.timestamp,
                    category: self.categorize(fv),
                    anomaly_score: score,
                    raw_values: snapshot(fv),
                })
            })
            .collect()
    }

    /// Latency or resource utilisation above its alert threshold
    pub fn breaches_hard_threshold(&self, fv: &FeatureVector) -> bool {
        self.is_performance(fv) || self.is_resource(fv)
    }

    /// First matching category in priority order: performance, resource
    /// consumption, growth rate, usage pattern.
    pub fn categorize(&self, fv: &FeatureVector) -> AnomalyCategory {
        if self.is_performance(fv) {
            AnomalyCategory::Performance
        } else if self.is_resource(fv) {
            AnomalyCategory::ResourceConsumption
        } else if fv
            .growth_rate_1d
            .is_some_and(|g| g.abs() > self.thresholds.growth_rate)
        {
            AnomalyCategory::GrowthRate
        } else {
            AnomalyCategory::UsagePattern
        }
    }

    fn is_performance(&self, fv: &FeatureVector) -> bool {
        fv.api_response_time_ms > self.thresholds.api_latency_ms
    }

    fn is_resource(&self, fv: &FeatureVector) -> bool {
        fv.cpu_percent > self.thresholds.cpu_percent
            || fv.memory_percent > self.thresholds.memory_percent
            || fv.disk_percent > self.thresholds.disk_percent
    }
}

fn snapshot(fv: &FeatureVector) -> MetricSnapshot {
    MetricSnapshot {
        memory_count: fv.memory_count.max(0.0).round() as u64,
        api_response_time_ms: fv.api_response_time_ms,
        cpu_percent: fv.cpu_percent,
        memory_percent: fv.memory_percent,
        disk_percent: fv.disk_percent,
    }
}

/// Linear-interpolation quantile, `q` in [0, 1]
fn quantile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}
