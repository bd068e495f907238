//! System health scoring
//!
//! Aggregates three terms into a score in [0, 1]:
//! - resource headroom of the latest sample against the alert thresholds
//! - pressure from recent anomalies, weighted by category
//! - the forecast trend of the primary target, discounted by model accuracy
//!
//! Each contributing factor is `weight * term`, so the factors sum to the score.

use crate::config::{AlertThresholds, AnalysisConfig, HealthConfig};
use crate::models::{
    AnomalyCategory, AnomalyEvent, ForecastResult, HealthScore, HealthStatus, MetricSample,
    TrendDirection,
};
use chrono::Duration;
use std::collections::BTreeMap;

pub const RESOURCE_HEADROOM: &str = "resource_headroom";
pub const ANOMALY_PRESSURE: &str = "anomaly_pressure";
pub const FORECAST_TREND: &str = "forecast_trend";

/// Trend term when no forecast is available
const NEUTRAL_TREND: f64 = 0.75;
const FAVORABLE_TREND: f64 = 1.0;
const STABLE_TREND: f64 = 0.85;
const UNFAVORABLE_TREND: f64 = 0.4;

fn category_weight(category: AnomalyCategory) -> f64 {
    match category {
        AnomalyCategory::Performance | AnomalyCategory::ResourceConsumption => 1.0,
        AnomalyCategory::GrowthRate => 0.6,
        AnomalyCategory::UsagePattern => 0.3,
    }
}

pub struct HealthScorer {
    config: HealthConfig,
    thresholds: AlertThresholds,
}

impl HealthScorer {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            config: config.health.clone(),
            thresholds: config.thresholds.clone(),
        }
    }

    /// Score the latest sample against recent anomalies and the forecast.
    ///
    /// # Arguments
    /// * `latest` - most recent sample of the run snapshot
    /// * `recent_anomalies` - events inside the lookback window, see [`HealthScorer::recent`]
    /// * `forecast` - primary target forecast, `None` when that stage was skipped
    pub fn score(
        &self,
        latest: &MetricSample,
        recent_anomalies: &[AnomalyEvent],
        forecast: Option<&ForecastResult>,
    ) -> HealthScore {
        let weights = &self.config.weights;
        let factors = BTreeMap::from([
            (
                RESOURCE_HEADROOM.to_string(),
                weights.resource_headroom * self.resource_headroom(latest),
            ),
            (
                ANOMALY_PRESSURE.to_string(),
                weights.anomaly_pressure * self.anomaly_pressure(recent_anomalies),
            ),
            (
                FORECAST_TREND.to_string(),
                weights.forecast_trend * forecast_trend(forecast),
            ),
        ]);

        let score = factors.values().sum::<f64>().clamp(0.0, 1.0);
        HealthScore {
            score,
            contributing_factors: factors,
            status: HealthStatus::from_score(score),
        }
    }

    /// Events whose source sample lies within the lookback window ending at `latest`
    pub fn recent(&self, latest: &MetricSample, anomalies: &[AnomalyEvent]) -> Vec<AnomalyEvent> {
        let since = latest.timestamp - Duration::hours(i64::from(self.config.lookback_hours));
        anomalies
            .iter()
            .filter(|e| {
                e.source_sample_timestamp > since && e.source_sample_timestamp <= latest.timestamp
            })
            .cloned()
            .collect()
    }

    /// Mean per-metric headroom of cpu, memory and disk utilisation
    pub fn resource_headroom(&self, latest: &MetricSample) -> f64 {
        let terms = [
            (latest.cpu_percent, self.thresholds.cpu_percent),
            (latest.memory_percent, self.thresholds.memory_percent),
            (latest.disk_percent, self.thresholds.disk_percent),
        ];
        terms
            .iter()
            .map(|(value, threshold)| self.headroom_term(value / threshold))
            .sum::<f64>()
            / terms.len() as f64
    }

    fn headroom_term(&self, ratio: f64) -> f64 {
        let safe = self.config.safe_utilization_ratio;
        if ratio <= safe {
            1.0
        } else if ratio >= 1.0 {
            0.0
        } else {
            (1.0 - ratio) / (1.0 - safe)
        }
    }

    pub fn anomaly_pressure(&self, recent_anomalies: &[AnomalyEvent]) -> f64 {
        let weighted: f64 = recent_anomalies
            .iter()
            .map(|e| category_weight(e.category))
            .sum();
        1.0 - (weighted / self.config.anomaly_count_critical).min(1.0)
    }
}

fn forecast_trend(forecast: Option<&ForecastResult>) -> f64 {
    let Some(forecast) = forecast else {
        return NEUTRAL_TREND;
    };
    let higher_is_better = forecast.target_metric.higher_is_better();
    let raw = match (forecast.trend_direction, higher_is_better) {
        (TrendDirection::Stable, _) => STABLE_TREND,
        (TrendDirection::Increasing, true) | (TrendDirection::Decreasing, false) => FAVORABLE_TREND,
        (TrendDirection::Increasing, false) | (TrendDirection::Decreasing, true) => UNFAVORABLE_TREND,
    };
    let accuracy = forecast.model_accuracy.clamp(0.0, 1.0);
    NEUTRAL_TREND + (raw - NEUTRAL_TREND) * accuracy
}
