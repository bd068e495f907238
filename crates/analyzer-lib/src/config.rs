//! Analysis configuration
//!
//! Every threshold, weight and model parameter lives here and is resolved once
//! at run start. Components receive the section they need by reference.

use crate::error::{AnalysisError, Result};
use crate::models::MetricName;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Longest lookback a run may snapshot
pub const MAX_ANALYSIS_PERIOD_DAYS: u32 = 3650;

/// Longest forecast a run may produce
pub const MAX_HORIZON_DAYS: usize = 3650;

/// Top-level configuration for an analysis run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Lookback window for the run snapshot
    #[serde(default = "default_analysis_period_days")]
    pub analysis_period_days: u32,

    #[serde(default)]
    pub min_data_points: MinDataPoints,

    /// Contamination rate used to calibrate the anomaly decision boundary
    #[serde(default = "default_anomaly_threshold")]
    pub anomaly_threshold: f64,

    /// Coverage of forecast prediction intervals
    #[serde(default = "default_confidence_level")]
    pub confidence_level: f64,

    #[serde(default = "default_prediction_horizon_days")]
    pub prediction_horizon_days: usize,

    #[serde(default)]
    pub thresholds: AlertThresholds,

    #[serde(default)]
    pub forecast: ForecastConfig,

    #[serde(default)]
    pub anomaly: AnomalyConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub recommendations: RecommendationConfig,

    #[serde(default)]
    pub collector: CollectorConfig,

    /// Seed for every randomized estimator
    #[serde(default = "default_random_seed")]
    pub random_seed: u64,

    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,

    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Defaults to `<output_dir>/.analysis.lock`
    #[serde(default)]
    pub lock_path: Option<PathBuf>,
}

/// Minimum history per stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinDataPoints {
    #[serde(default = "default_feature_window")]
    pub feature_window: usize,
    #[serde(default = "default_forecast_min")]
    pub forecast: usize,
    #[serde(default = "default_anomaly_min")]
    pub anomaly: usize,
}

/// Hard alert thresholds, also used for anomaly categorisation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertThresholds {
    #[serde(default = "default_api_latency_ms")]
    pub api_latency_ms: f64,
    #[serde(default = "default_cpu_percent")]
    pub cpu_percent: f64,
    #[serde(default = "default_memory_percent")]
    pub memory_percent: f64,
    #[serde(default = "default_disk_percent")]
    pub disk_percent: f64,
    /// Absolute relative change between consecutive samples
    #[serde(default = "default_growth_rate")]
    pub growth_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastConfig {
    /// Forecast targets, processed in this order
    #[serde(default = "default_forecast_targets")]
    pub targets: Vec<MetricName>,
    #[serde(default = "default_validation_fraction")]
    pub validation_fraction: f64,
    /// Relative slope below which a trend is stable
    #[serde(default = "default_trend_epsilon")]
    pub trend_epsilon: f64,
    #[serde(default = "default_ridge_lambda")]
    pub ridge_lambda: f64,
    #[serde(default = "default_forest_trees")]
    pub forest_trees: usize,
    #[serde(default = "default_forest_max_depth")]
    pub forest_max_depth: usize,
    #[serde(default = "default_forest_min_leaf")]
    pub forest_min_samples_leaf: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyConfig {
    #[serde(default = "default_anomaly_trees")]
    pub trees: usize,
    #[serde(default = "default_anomaly_sample_size")]
    pub sample_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthWeights {
    #[serde(default = "default_weight_resource")]
    pub resource_headroom: f64,
    #[serde(default = "default_weight_anomaly")]
    pub anomaly_pressure: f64,
    #[serde(default = "default_weight_trend")]
    pub forecast_trend: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default)]
    pub weights: HealthWeights,
    /// Anomalies newer than this (relative to the latest sample) count as recent
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: u32,
    /// Weighted anomaly count at which the anomaly term reaches zero
    #[serde(default = "default_anomaly_count_critical")]
    pub anomaly_count_critical: f64,
    /// Utilisation ratio (of the critical threshold) below which headroom is full
    #[serde(default = "default_safe_utilization_ratio")]
    pub safe_utilization_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationConfig {
    #[serde(default = "default_resource_anomaly_min")]
    pub resource_anomaly_min_count: usize,
    #[serde(default = "default_performance_anomaly_min")]
    pub performance_anomaly_min_count: usize,
    #[serde(default = "default_growth_anomaly_min")]
    pub growth_anomaly_min_count: usize,
    #[serde(default = "default_usage_anomaly_min")]
    pub usage_anomaly_min_count: usize,
    /// Projected growth over the horizon that triggers capacity planning
    #[serde(default = "default_capacity_growth_ratio")]
    pub capacity_growth_ratio: f64,
    #[serde(default = "default_low_accuracy")]
    pub low_accuracy: f64,
    #[serde(default = "default_dominant_feature_weight")]
    pub dominant_feature_weight: f64,
    /// Resource headroom term below which scaling is recommended
    #[serde(default = "default_low_headroom")]
    pub low_headroom: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Endpoint returning the stored memories; probed for count and latency
    #[serde(default)]
    pub memory_api_url: Option<String>,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_proc_path")]
    pub proc_path: PathBuf,
    /// Filesystem whose usage is reported as disk_percent
    #[serde(default = "default_disk_path")]
    pub disk_path: PathBuf,
    #[serde(default = "default_cpu_sample_ms")]
    pub cpu_sample_ms: u64,
}

fn default_analysis_period_days() -> u32 {
    30
}
fn default_anomaly_threshold() -> f64 {
    0.1
}
fn default_confidence_level() -> f64 {
    0.95
}
fn default_prediction_horizon_days() -> usize {
    90
}
fn default_random_seed() -> u64 {
    42
}
fn default_run_timeout_secs() -> u64 {
    300
}
fn default_database_path() -> PathBuf {
    PathBuf::from("metrics.db")
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("reports")
}
fn default_feature_window() -> usize {
    7
}
fn default_forecast_min() -> usize {
    5
}
fn default_anomaly_min() -> usize {
    10
}
fn default_api_latency_ms() -> f64 {
    1000.0
}
fn default_cpu_percent() -> f64 {
    80.0
}
fn default_memory_percent() -> f64 {
    85.0
}
fn default_disk_percent() -> f64 {
    90.0
}
fn default_growth_rate() -> f64 {
    0.5
}
fn default_forecast_targets() -> Vec<MetricName> {
    vec![MetricName::MemoryCount]
}
fn default_validation_fraction() -> f64 {
    0.2
}
fn default_trend_epsilon() -> f64 {
    0.01
}
fn default_ridge_lambda() -> f64 {
    1.0
}
fn default_forest_trees() -> usize {
    50
}
fn default_forest_max_depth() -> usize {
    6
}
fn default_forest_min_leaf() -> usize {
    2
}
fn default_anomaly_trees() -> usize {
    100
}
fn default_anomaly_sample_size() -> usize {
    256
}
fn default_weight_resource() -> f64 {
    0.40
}
fn default_weight_anomaly() -> f64 {
    0.35
}
fn default_weight_trend() -> f64 {
    0.25
}
fn default_lookback_hours() -> u32 {
    24
}
fn default_anomaly_count_critical() -> f64 {
    10.0
}
fn default_safe_utilization_ratio() -> f64 {
    0.5
}
fn default_resource_anomaly_min() -> usize {
    3
}
fn default_performance_anomaly_min() -> usize {
    1
}
fn default_growth_anomaly_min() -> usize {
    1
}
fn default_usage_anomaly_min() -> usize {
    3
}
fn default_capacity_growth_ratio() -> f64 {
    0.5
}
fn default_low_accuracy() -> f64 {
    0.5
}
fn default_dominant_feature_weight() -> f64 {
    0.4
}
fn default_low_headroom() -> f64 {
    0.5
}
fn default_probe_timeout_secs() -> u64 {
    10
}
fn default_proc_path() -> PathBuf {
    PathBuf::from("/proc")
}
fn default_disk_path() -> PathBuf {
    PathBuf::from("/")
}
fn default_cpu_sample_ms() -> u64 {
    250
}

impl Default for MinDataPoints {
    fn default() -> Self {
        Self {
            feature_window: default_feature_window(),
            forecast: default_forecast_min(),
            anomaly: default_anomaly_min(),
        }
    }
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            api_latency_ms: default_api_latency_ms(),
            cpu_percent: default_cpu_percent(),
            memory_percent: default_memory_percent(),
            disk_percent: default_disk_percent(),
            growth_rate: default_growth_rate(),
        }
    }
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            targets: default_forecast_targets(),
            validation_fraction: default_validation_fraction(),
            trend_epsilon: default_trend_epsilon(),
            ridge_lambda: default_ridge_lambda(),
            forest_trees: default_forest_trees(),
            forest_max_depth: default_forest_max_depth(),
            forest_min_samples_leaf: default_forest_min_leaf(),
        }
    }
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            trees: default_anomaly_trees(),
            sample_size: default_anomaly_sample_size(),
        }
    }
}

impl Default for HealthWeights {
    fn default() -> Self {
        Self {
            resource_headroom: default_weight_resource(),
            anomaly_pressure: default_weight_anomaly(),
            forecast_trend: default_weight_trend(),
        }
    }
}

impl HealthWeights {
    pub fn sum(&self) -> f64 {
        self.resource_headroom + self.anomaly_pressure + self.forecast_trend
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            weights: HealthWeights::default(),
            lookback_hours: default_lookback_hours(),
            anomaly_count_critical: default_anomaly_count_critical(),
            safe_utilization_ratio: default_safe_utilization_ratio(),
        }
    }
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            resource_anomaly_min_count: default_resource_anomaly_min(),
            performance_anomaly_min_count: default_performance_anomaly_min(),
            growth_anomaly_min_count: default_growth_anomaly_min(),
            usage_anomaly_min_count: default_usage_anomaly_min(),
            capacity_growth_ratio: default_capacity_growth_ratio(),
            low_accuracy: default_low_accuracy(),
            dominant_feature_weight: default_dominant_feature_weight(),
            low_headroom: default_low_headroom(),
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            memory_api_url: None,
            probe_timeout_secs: default_probe_timeout_secs(),
            proc_path: default_proc_path(),
            disk_path: default_disk_path(),
            cpu_sample_ms: default_cpu_sample_ms(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            analysis_period_days: default_analysis_period_days(),
            min_data_points: MinDataPoints::default(),
            anomaly_threshold: default_anomaly_threshold(),
            confidence_level: default_confidence_level(),
            prediction_horizon_days: default_prediction_horizon_days(),
            thresholds: AlertThresholds::default(),
            forecast: ForecastConfig::default(),
            anomaly: AnomalyConfig::default(),
            health: HealthConfig::default(),
            recommendations: RecommendationConfig::default(),
            collector: CollectorConfig::default(),
            random_seed: default_random_seed(),
            run_timeout_secs: default_run_timeout_secs(),
            database_path: default_database_path(),
            output_dir: default_output_dir(),
            lock_path: None,
        }
    }
}

impl AnalysisConfig {
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.lock_path
            .clone()
            .unwrap_or_else(|| self.output_dir.join(".analysis.lock"))
    }

    /// Reject configurations that would make a stage meaningless.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(AnalysisError::InvalidConfig(msg));

        if !(1..=MAX_ANALYSIS_PERIOD_DAYS).contains(&self.analysis_period_days) {
            return fail(format!(
                "analysis_period_days must be within [1, {}], got {}",
                MAX_ANALYSIS_PERIOD_DAYS, self.analysis_period_days
            ));
        }
        if !(1..=MAX_HORIZON_DAYS).contains(&self.prediction_horizon_days) {
            return fail(format!(
                "prediction_horizon_days must be within [1, {}], got {}",
                MAX_HORIZON_DAYS, self.prediction_horizon_days
            ));
        }
        if self.min_data_points.feature_window < 7 {
            return fail("min_data_points.feature_window must be at least 7".into());
        }
        if self.min_data_points.forecast < 3 {
            return fail("min_data_points.forecast must be at least 3".into());
        }
        if self.min_data_points.anomaly < 2 {
            return fail("min_data_points.anomaly must be at least 2".into());
        }
        if !(0.0..=0.5).contains(&self.anomaly_threshold) {
            return fail(format!(
                "anomaly_threshold must be within [0, 0.5], got {}",
                self.anomaly_threshold
            ));
        }
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return fail(format!(
                "confidence_level must be within (0, 1), got {}",
                self.confidence_level
            ));
        }
        if self.forecast.targets.is_empty() {
            return fail("forecast.targets must name at least one metric".into());
        }
        if !(self.forecast.validation_fraction > 0.0 && self.forecast.validation_fraction < 1.0) {
            return fail("forecast.validation_fraction must be within (0, 1)".into());
        }
        if self.forecast.trend_epsilon < 0.0 || self.forecast.ridge_lambda < 0.0 {
            return fail("forecast.trend_epsilon and forecast.ridge_lambda must be non-negative".into());
        }
        if self.forecast.forest_trees == 0 || self.anomaly.trees == 0 {
            return fail("tree counts must be at least 1".into());
        }
        if self.anomaly.sample_size < 2 {
            return fail("anomaly.sample_size must be at least 2".into());
        }
        let w = &self.health.weights;
        if [w.resource_headroom, w.anomaly_pressure, w.forecast_trend]
            .iter()
            .any(|v| *v < 0.0)
        {
            return fail("health weights must be non-negative".into());
        }
        if (w.sum() - 1.0).abs() > 1e-6 {
            return fail(format!("health weights must sum to 1.0, got {:.6}", w.sum()));
        }
        if !(self.health.safe_utilization_ratio >= 0.0 && self.health.safe_utilization_ratio < 1.0) {
            return fail("health.safe_utilization_ratio must be within [0, 1)".into());
        }
        if self.health.anomaly_count_critical <= 0.0 {
            return fail("health.anomaly_count_critical must be positive".into());
        }
        let t = &self.thresholds;
        for (name, value) in [
            ("cpu_percent", t.cpu_percent),
            ("memory_percent", t.memory_percent),
            ("disk_percent", t.disk_percent),
        ] {
            if !(value > 0.0 && value <= 100.0) {
                return fail(format!("thresholds.{} must be within (0, 100]", name));
            }
        }
        if t.api_latency_ms <= 0.0 || t.growth_rate <= 0.0 {
            return fail("thresholds.api_latency_ms and thresholds.growth_rate must be positive".into());
        }
        if self.run_timeout_secs == 0 {
            return fail("run_timeout_secs must be at least 1".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AnalysisConfig::default();
        config.validate().unwrap();
        assert_eq!(config.analysis_period_days, 30);
        assert_eq!(config.prediction_horizon_days, 90);
        assert_eq!(config.anomaly_threshold, 0.1);
        assert_eq!(config.min_data_points.forecast, 5);
        assert_eq!(config.min_data_points.feature_window, 7);
        assert_eq!(config.thresholds.api_latency_ms, 1000.0);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: AnalysisConfig =
            serde_json::from_str(r#"{"prediction_horizon_days": 14, "thresholds": {"cpu_percent": 70}}"#)
                .unwrap();
        assert_eq!(config.prediction_horizon_days, 14);
        assert_eq!(config.thresholds.cpu_percent, 70.0);
        assert_eq!(config.thresholds.disk_percent, 90.0);
        assert_eq!(config.forecast.targets, vec![MetricName::MemoryCount]);
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let mut config = AnalysisConfig::default();
        config.health.weights.forecast_trend = 0.5;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidConfig(_)));
    }

    #[test]
    fn test_contamination_range() {
        let mut config = AnalysisConfig::default();
        config.anomaly_threshold = 0.9;
        assert!(config.validate().is_err());
        config.anomaly_threshold = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_day_counts_are_bounded() {
        let mut config = AnalysisConfig::default();
        config.prediction_horizon_days = MAX_HORIZON_DAYS;
        assert!(config.validate().is_ok());
        config.prediction_horizon_days = 100_000_000;
        assert!(matches!(config.validate(), Err(AnalysisError::InvalidConfig(_))));
        config.prediction_horizon_days = usize::MAX;
        assert!(config.validate().is_err());

        let mut config = AnalysisConfig::default();
        config.analysis_period_days = u32::MAX;
        assert!(matches!(config.validate(), Err(AnalysisError::InvalidConfig(_))));
    }

    #[test]
    fn test_lock_path_default() {
        let config = AnalysisConfig::default();
        assert_eq!(config.lock_path(), PathBuf::from("reports/.analysis.lock"));
    }
}
