//! Core data models for the analysis engine

use crate::error::{AnalysisError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// One periodic observation of the memory store and its host.
///
/// Fields are public for reading; construction goes through [`MetricSample::new`]
/// (or validated deserialization) so out-of-range values never reach analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMetricSample")]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    pub memory_count: u64,
    pub api_response_time_ms: f64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
}

#[derive(Deserialize)]
struct RawMetricSample {
    timestamp: DateTime<Utc>,
    memory_count: u64,
    api_response_time_ms: f64,
    cpu_percent: f64,
    memory_percent: f64,
    disk_percent: f64,
}

impl TryFrom<RawMetricSample> for MetricSample {
    type Error = AnalysisError;

    fn try_from(raw: RawMetricSample) -> Result<Self> {
        MetricSample::new(
            raw.timestamp,
            raw.memory_count,
            raw.api_response_time_ms,
            raw.cpu_percent,
            raw.memory_percent,
            raw.disk_percent,
        )
    }
}

impl MetricSample {
    pub fn new(
        timestamp: DateTime<Utc>,
        memory_count: u64,
        api_response_time_ms: f64,
        cpu_percent: f64,
        memory_percent: f64,
        disk_percent: f64,
    ) -> Result<Self> {
        let sample = Self {
            timestamp,
            memory_count,
            api_response_time_ms,
            cpu_percent,
            memory_percent,
            disk_percent,
        };
        sample.validate()?;
        Ok(sample)
    }

    /// Check range invariants: latency non-negative, percentages within [0, 100].
    pub fn validate(&self) -> Result<()> {
        if !self.api_response_time_ms.is_finite() || self.api_response_time_ms < 0.0 {
            return Err(AnalysisError::InvalidSample(format!(
                "api_response_time_ms must be a non-negative number, got {}",
                self.api_response_time_ms
            )));
        }
        for (name, value) in [
            ("cpu_percent", self.cpu_percent),
            ("memory_percent", self.memory_percent),
            ("disk_percent", self.disk_percent),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(AnalysisError::InvalidSample(format!(
                    "{} must be within [0, 100], got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    pub fn value_of(&self, metric: MetricName) -> f64 {
        match metric {
            MetricName::MemoryCount => self.memory_count as f64,
            MetricName::ApiResponseTimeMs => self.api_response_time_ms,
            MetricName::CpuPercent => self.cpu_percent,
            MetricName::MemoryPercent => self.memory_percent,
            MetricName::DiskPercent => self.disk_percent,
        }
    }

    /// Copy of this sample with one metric replaced, used for synthetic forecast steps.
    pub(crate) fn with_value(&self, metric: MetricName, value: f64, timestamp: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.timestamp = timestamp;
        match metric {
            MetricName::MemoryCount => next.memory_count = value.max(0.0).round() as u64,
            MetricName::ApiResponseTimeMs => next.api_response_time_ms = value.max(0.0),
            MetricName::CpuPercent => next.cpu_percent = value.clamp(0.0, 100.0),
            MetricName::MemoryPercent => next.memory_percent = value.clamp(0.0, 100.0),
            MetricName::DiskPercent => next.disk_percent = value.clamp(0.0, 100.0),
        }
        next
    }

    pub fn snapshot(&self) -> MetricSnapshot {
        MetricSnapshot {
            memory_count: self.memory_count,
            api_response_time_ms: self.api_response_time_ms,
            cpu_percent: self.cpu_percent,
            memory_percent: self.memory_percent,
            disk_percent: self.disk_percent,
        }
    }
}

/// Metrics that can be used as a forecast target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricName {
    MemoryCount,
    ApiResponseTimeMs,
    CpuPercent,
    MemoryPercent,
    DiskPercent,
}

impl MetricName {
    pub const ALL: [MetricName; 5] = [
        MetricName::MemoryCount,
        MetricName::ApiResponseTimeMs,
        MetricName::CpuPercent,
        MetricName::MemoryPercent,
        MetricName::DiskPercent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::MemoryCount => "memory_count",
            MetricName::ApiResponseTimeMs => "api_response_time_ms",
            MetricName::CpuPercent => "cpu_percent",
            MetricName::MemoryPercent => "memory_percent",
            MetricName::DiskPercent => "disk_percent",
        }
    }

    /// Whether growth of this metric is a good sign for the system.
    pub fn higher_is_better(&self) -> bool {
        matches!(self, MetricName::MemoryCount)
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricName {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        MetricName::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| AnalysisError::InvalidConfig(format!("unknown metric '{}'", s)))
    }
}

/// Snapshot of the metric values behind an anomaly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub memory_count: u64,
    pub api_response_time_ms: f64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
}

/// Engineered features for one sample, computed from trailing history only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub timestamp: DateTime<Utc>,
    /// 0 = Monday
    pub day_of_week: u32,
    pub hour: u32,
    pub days_since_start: f64,
    pub memory_count: f64,
    pub api_response_time_ms: f64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    pub target: MetricName,
    pub target_value: f64,
    pub rolling_avg_3: Option<f64>,
    pub rolling_avg_7: Option<f64>,
    pub growth_rate_1d: Option<f64>,
    pub growth_rate_7d: Option<f64>,
}

impl FeatureVector {
    /// True once every trailing-window feature is defined
    pub fn is_complete(&self) -> bool {
        self.rolling_avg_3.is_some()
            && self.rolling_avg_7.is_some()
            && self.growth_rate_1d.is_some()
            && self.growth_rate_7d.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrendDirection::Increasing => write!(f, "increasing"),
            TrendDirection::Decreasing => write!(f, "decreasing"),
            TrendDirection::Stable => write!(f, "stable"),
        }
    }
}

/// One forecast day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub value: f64,
    pub lower: f64,
    pub upper: f64,
}

/// Output of the trend/forecast model for one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    pub target_metric: MetricName,
    pub horizon_days: usize,
    pub predicted_series: Vec<ForecastPoint>,
    pub model_accuracy: f64,
    pub trend_direction: TrendDirection,
    pub feature_importances: BTreeMap<String, f64>,
    pub ensemble_weights: BTreeMap<String, f64>,
    pub generated_at: DateTime<Utc>,
}

impl ForecastResult {
    /// Relative change from the first to the last predicted value
    pub fn projected_growth_ratio(&self) -> Option<f64> {
        let first = self.predicted_series.first()?.value;
        let last = self.predicted_series.last()?.value;
        if first.abs() < f64::EPSILON {
            return None;
        }
        Some((last - first) / first.abs())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyCategory {
    Performance,
    ResourceConsumption,
    GrowthRate,
    UsagePattern,
}

impl AnomalyCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyCategory::Performance => "performance",
            AnomalyCategory::ResourceConsumption => "resource_consumption",
            AnomalyCategory::GrowthRate => "growth_rate",
            AnomalyCategory::UsagePattern => "usage_pattern",
        }
    }
}

impl fmt::Display for AnomalyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnomalyCategory {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "performance" => Ok(AnomalyCategory::Performance),
            "resource_consumption" => Ok(AnomalyCategory::ResourceConsumption),
            "growth_rate" => Ok(AnomalyCategory::GrowthRate),
            "usage_pattern" => Ok(AnomalyCategory::UsagePattern),
            other => Err(AnalysisError::Store(format!("unknown anomaly category '{}'", other))),
        }
    }
}

/// One flagged deviation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub detected_at: DateTime<Utc>,
    pub source_sample_timestamp: DateTime<Utc>,
    pub category: AnomalyCategory,
    pub anomaly_score: f64,
    pub raw_values: MetricSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

impl HealthStatus {
    /// Fixed breakpoints: below 0.5 critical, below 0.75 warning.
    pub fn from_score(score: f64) -> Self {
        if score < 0.5 {
            HealthStatus::Critical
        } else if score < 0.75 {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Warning => write!(f, "warning"),
            HealthStatus::Critical => write!(f, "critical"),
        }
    }
}

/// Single scalar summary per run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthScore {
    pub score: f64,
    pub contributing_factors: BTreeMap<String, f64>,
    pub status: HealthStatus,
}

/// Ordered low < medium < high
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    Medium,
    High,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Low => write!(f, "low"),
            Level::Medium => write!(f, "medium"),
            Level::High => write!(f, "high"),
        }
    }
}

/// One actionable suggestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub category: String,
    pub priority: Level,
    pub text: String,
    pub impact_score: f64,
    pub implementation_effort: Level,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_valid_sample() {
        let s = MetricSample::new(ts(), 100, 50.0, 20.0, 30.0, 40.0).unwrap();
        assert_eq!(s.value_of(MetricName::MemoryCount), 100.0);
        assert_eq!(s.value_of(MetricName::DiskPercent), 40.0);
    }

    #[test]
    fn test_percentage_out_of_range_rejected() {
        let err = MetricSample::new(ts(), 100, 50.0, 101.0, 30.0, 40.0).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidSample(_)));
        let err = MetricSample::new(ts(), 100, 50.0, 20.0, -0.1, 40.0).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidSample(_)));
    }

    #[test]
    fn test_negative_latency_rejected() {
        let err = MetricSample::new(ts(), 100, -1.0, 20.0, 30.0, 40.0).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidSample(_)));
        assert!(MetricSample::new(ts(), 100, f64::NAN, 20.0, 30.0, 40.0).is_err());
    }

    #[test]
    fn test_boundary_percentages_accepted() {
        assert!(MetricSample::new(ts(), 0, 0.0, 0.0, 100.0, 100.0).is_ok());
    }

    #[test]
    fn test_deserialize_validates() {
        let json = r#"{"timestamp":"2024-03-01T12:00:00Z","memory_count":5,
            "api_response_time_ms":10.0,"cpu_percent":150.0,"memory_percent":1.0,"disk_percent":1.0}"#;
        assert!(serde_json::from_str::<MetricSample>(json).is_err());

        let json = json.replace("150.0", "15.0");
        let sample: MetricSample = serde_json::from_str(&json).unwrap();
        assert_eq!(sample.cpu_percent, 15.0);
    }

    #[test]
    fn test_health_status_breakpoints() {
        assert_eq!(HealthStatus::from_score(0.0), HealthStatus::Critical);
        assert_eq!(HealthStatus::from_score(0.4999), HealthStatus::Critical);
        assert_eq!(HealthStatus::from_score(0.5), HealthStatus::Warning);
        assert_eq!(HealthStatus::from_score(0.7499), HealthStatus::Warning);
        assert_eq!(HealthStatus::from_score(0.75), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_score(1.0), HealthStatus::Healthy);
    }

    #[test]
    fn test_level_ordering() {
        assert!(Level::High > Level::Medium);
        assert!(Level::Medium > Level::Low);
    }

    #[test]
    fn test_metric_name_round_trip() {
        for m in MetricName::ALL {
            assert_eq!(m.as_str().parse::<MetricName>().unwrap(), m);
        }
        assert!("latency".parse::<MetricName>().is_err());
    }
}
