//! Feature engineering over metric history
//!
//! Builds one feature vector per sample from trailing history only: temporal
//! context, raw metric passthroughs, rolling averages and growth rates of the
//! target metric. Windows are counted in samples.

use crate::error::{AnalysisError, Result};
use crate::models::{FeatureVector, MetricName, MetricSample};
use chrono::{DateTime, Datelike, Timelike, Utc};

/// Short rolling window
pub const SHORT_WINDOW: usize = 3;

/// Long rolling window, also the base distance of `growth_rate_7d`
pub const LONG_WINDOW: usize = 7;

/// Builds feature vectors from ascending metric history
#[derive(Debug, Clone)]
pub struct FeatureBuilder {
    min_samples: usize,
}

impl Default for FeatureBuilder {
    fn default() -> Self {
        Self::new(LONG_WINDOW)
    }
}

impl FeatureBuilder {
    /// `min_samples` is the history length below which rolling features are refused
    pub fn new(min_samples: usize) -> Self {
        Self {
            min_samples: min_samples.max(LONG_WINDOW),
        }
    }

    pub fn has_sufficient_data(&self, history: &[MetricSample]) -> bool {
        history.len() >= self.min_samples
    }

    /// One feature vector per sample of `history`.
    ///
    /// # Arguments
    /// * `history` - samples in ascending timestamp order
    /// * `target` - metric whose rolling averages and growth rates are computed
    ///
    /// Vectors near the start of the history carry `None` for windows that are
    /// not yet full.
    pub fn build_features(
        &self,
        history: &[MetricSample],
        target: MetricName,
    ) -> Result<Vec<FeatureVector>> {
        if !self.has_sufficient_data(history) {
            return Err(AnalysisError::insufficient(
                "features",
                history.len(),
                self.min_samples,
            ));
        }
        for sample in history {
            sample.validate()?;
        }
        ensure_ascending(history)?;
        let origin = history[0].timestamp;
        Ok(compute_features(history, target, origin))
    }
}

fn ensure_ascending(history: &[MetricSample]) -> Result<()> {
    match history
        .windows(2)
        .position(|w| w[1].timestamp < w[0].timestamp)
    {
        Some(i) => Err(AnalysisError::InvalidSample(format!(
            "history is not in ascending order at index {}",
            i + 1
        ))),
        None => Ok(()),
    }
}

/// Feature computation without the minimum-length check.
///
/// `origin` anchors `days_since_start`, so a retained history tail can be
/// extended without shifting the time axis.
pub(crate) fn compute_features(
    history: &[MetricSample],
    target: MetricName,
    origin: DateTime<Utc>,
) -> Vec<FeatureVector> {
    let values: Vec<f64> = history.iter().map(|s| s.value_of(target)).collect();

    history
        .iter()
        .enumerate()
        .map(|(i, sample)| {
            let ts = sample.timestamp;
            FeatureVector {
                timestamp: ts,
                day_of_week: ts.weekday().num_days_from_monday(),
                hour: ts.hour(),
                days_since_start: (ts - origin).num_seconds() as f64 / 86_400.0,
                memory_count: sample.memory_count as f64,
                api_response_time_ms: sample.api_response_time_ms,
                cpu_percent: sample.cpu_percent,
                memory_percent: sample.memory_percent,
                disk_percent: sample.disk_percent,
                target,
                target_value: values[i],
                rolling_avg_3: trailing_mean(&values, i, SHORT_WINDOW),
                rolling_avg_7: trailing_mean(&values, i, LONG_WINDOW),
                growth_rate_1d: growth_rate(&values, i, 1),
                growth_rate_7d: growth_rate(&values, i, LONG_WINDOW - 1),
            }
        })
        .collect()
}

/// Mean of the `window` samples ending at `i` (inclusive)
fn trailing_mean(values: &[f64], i: usize, window: usize) -> Option<f64> {
    if i + 1 < window {
        return None;
    }
    Some(mean(&values[i + 1 - window..=i]))
}

/// `(current - base) / base` where base sits `periods` samples back
fn growth_rate(values: &[f64], i: usize, periods: usize) -> Option<f64> {
    if i < periods {
        return None;
    }
    let base = values[i - periods];
    if base == 0.0 {
        return None;
    }
    Some((values[i] - base) / base)
}

/// Closing (last) sample of each UTC day, ascending
pub fn daily_rollup(history: &[MetricSample]) -> Vec<MetricSample> {
    let mut rolled: Vec<MetricSample> = Vec::new();
    for sample in history {
        match rolled.last_mut() {
            Some(last) if last.timestamp.date_naive() == sample.timestamp.date_naive() => {
                *last = sample.clone();
            }
            _ => rolled.push(sample.clone()),
        }
    }
    rolled
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance
pub(crate) fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

/// Calculate linear regression slope for trend detection
pub fn linear_regression_slope(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let sum_x: f64 = (0..values.len()).map(|i| i as f64).sum();
    let sum_y: f64 = values.iter().sum();
    let sum_xy: f64 = values.iter().enumerate().map(|(i, y)| i as f64 * y).sum();
    let sum_x2: f64 = (0..values.len()).map(|i| (i as f64).powi(2)).sum();
    let denom = n * sum_x2 - sum_x.powi(2);
    if denom.abs() < f64::EPSILON {
        return 0.0;
    }
    (n * sum_xy - sum_x * sum_y) / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn create_test_samples(count: usize, step: Duration) -> Vec<MetricSample> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..count)
            .map(|i| {
                MetricSample::new(
                    start + step * i as i32,
                    100 + i as u64 * 10,
                    50.0,
                    20.0 + i as f64 * 0.1,
                    30.0,
                    40.0,
                )
                .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_insufficient_samples() {
        let builder = FeatureBuilder::default();
        let samples = create_test_samples(6, Duration::hours(1));
        assert!(!builder.has_sufficient_data(&samples));
        let err = builder
            .build_features(&samples, MetricName::MemoryCount)
            .unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::InsufficientData { available: 6, required: 7, .. }
        ));
    }

    #[test]
    fn test_rejects_unordered_history() {
        let builder = FeatureBuilder::default();
        let mut samples = create_test_samples(8, Duration::hours(1));
        samples.swap(2, 5);
        let err = builder
            .build_features(&samples, MetricName::MemoryCount)
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidSample(_)));
    }

    #[test]
    fn test_rejects_out_of_range_sample() {
        let builder = FeatureBuilder::default();
        let mut samples = create_test_samples(8, Duration::hours(1));
        samples[3].cpu_percent = 140.0;
        let err = builder
            .build_features(&samples, MetricName::MemoryCount)
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidSample(_)));
    }

    #[test]
    fn test_windows_fill_in_order() {
        let builder = FeatureBuilder::default();
        let samples = create_test_samples(10, Duration::hours(1));
        let features = builder
            .build_features(&samples, MetricName::MemoryCount)
            .unwrap();
        assert_eq!(features.len(), 10);

        assert!(features[0].rolling_avg_3.is_none());
        assert!(features[0].growth_rate_1d.is_none());
        assert!(features[1].rolling_avg_3.is_none());
        assert_eq!(features[2].rolling_avg_3, Some(110.0));
        assert!(features[5].rolling_avg_7.is_none());
        assert_eq!(features[6].rolling_avg_7, Some(130.0));
        assert!(!features[5].is_complete());
        assert!(features[6].is_complete());

        assert_eq!(features[1].growth_rate_1d, Some(0.1));
        // (160 - 100) / 100
        assert!((features[6].growth_rate_7d.unwrap() - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_no_lookahead() {
        let builder = FeatureBuilder::default();
        let samples = create_test_samples(20, Duration::hours(1));
        let before = builder
            .build_features(&samples, MetricName::MemoryCount)
            .unwrap();

        let mut mutated = samples.clone();
        for s in mutated.iter_mut().skip(11) {
            s.memory_count *= 7;
        }
        let after = builder
            .build_features(&mutated, MetricName::MemoryCount)
            .unwrap();

        for i in 0..=10 {
            assert_eq!(before[i], after[i], "vector {} changed", i);
        }
        assert_ne!(before[11].rolling_avg_7, after[11].rolling_avg_7);
    }

    #[test]
    fn test_zero_base_growth_is_none() {
        let builder = FeatureBuilder::default();
        let mut samples = create_test_samples(8, Duration::hours(1));
        samples[3].memory_count = 0;
        let features = builder
            .build_features(&samples, MetricName::MemoryCount)
            .unwrap();
        assert!(features[4].growth_rate_1d.is_none());
        assert!(features[3].growth_rate_1d.is_some());
    }

    #[test]
    fn test_temporal_fields() {
        let builder = FeatureBuilder::default();
        let samples = create_test_samples(8, Duration::hours(13));
        let features = builder
            .build_features(&samples, MetricName::CpuPercent)
            .unwrap();
        // 2024-01-01 is a Monday
        assert_eq!(features[0].day_of_week, 0);
        assert_eq!(features[0].hour, 0);
        assert_eq!(features[2].day_of_week, 1);
        assert_eq!(features[2].hour, 2);
        assert!((features[2].days_since_start - 26.0 / 24.0).abs() < 1e-9);
        assert_eq!(features[0].target, MetricName::CpuPercent);
        assert_eq!(features[0].target_value, 20.0);
    }

    #[test]
    fn test_daily_rollup_keeps_closing_sample() {
        let samples = create_test_samples(72, Duration::hours(1));
        let rolled = daily_rollup(&samples);
        assert_eq!(rolled.len(), 3);
        assert_eq!(rolled[0].timestamp.hour(), 23);
        assert_eq!(rolled[0].memory_count, 100 + 23 * 10);
        assert_eq!(rolled[2].memory_count, 100 + 71 * 10);
        assert!(daily_rollup(&[]).is_empty());
    }

    #[test]
    fn test_variance_calculation() {
        let values = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((variance(&values) - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_linear_regression_slope() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert!((linear_regression_slope(&values) - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_empty_values() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(variance(&[]), 0.0);
        assert_eq!(linear_regression_slope(&[]), 0.0);
    }
}
