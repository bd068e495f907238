//! Observability infrastructure for analysis runs
//!
//! Provides:
//! - Prometheus run metrics (durations, anomaly counts, health, forecast accuracy)
//! - A text-format export of those metrics into the output directory
//! - Structured JSON logging of the run lifecycle with tracing

use crate::error::Result;
use crate::models::{AnomalyEvent, ForecastResult, HealthScore, HealthStatus};
use crate::report::atomic_write;
use prometheus::{
    register_gauge, register_gauge_vec, register_histogram, register_histogram_vec,
    register_int_counter_vec, register_int_gauge, Encoder, Gauge, GaugeVec, Histogram,
    HistogramVec, IntCounterVec, IntGauge, TextEncoder,
};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Exported metrics file, rewritten after every run
pub const METRICS_FILE: &str = "metrics.prom";

/// Histogram buckets for run and stage durations (in seconds)
const DURATION_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AnalyzerMetricsInner> = OnceLock::new();

struct AnalyzerMetricsInner {
    run_duration_seconds: Histogram,
    stage_duration_seconds: HistogramVec,
    samples_analyzed: IntGauge,
    anomalies_detected: GaugeVec,
    health_score: Gauge,
    forecast_accuracy: GaugeVec,
    stages_skipped: IntCounterVec,
    runs: IntCounterVec,
}

impl AnalyzerMetricsInner {
    fn new() -> Self {
        Self {
            run_duration_seconds: register_histogram!(
                "growth_analyzer_run_duration_seconds",
                "Wall-clock time of a full analysis run",
                DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register run_duration_seconds"),

            stage_duration_seconds: register_histogram_vec!(
                "growth_analyzer_stage_duration_seconds",
                "Time spent in each pipeline stage",
                &["stage"],
                DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register stage_duration_seconds"),

            samples_analyzed: register_int_gauge!(
                "growth_analyzer_samples_analyzed",
                "Samples in the snapshot of the last run"
            )
            .expect("Failed to register samples_analyzed"),

            anomalies_detected: register_gauge_vec!(
                "growth_analyzer_anomalies_detected",
                "Anomalies flagged by the last run, by category",
                &["category"]
            )
            .expect("Failed to register anomalies_detected"),

            health_score: register_gauge!(
                "growth_analyzer_health_score",
                "Health score of the last run"
            )
            .expect("Failed to register health_score"),

            forecast_accuracy: register_gauge_vec!(
                "growth_analyzer_forecast_accuracy",
                "Held-out accuracy of the last forecast, by target",
                &["target"]
            )
            .expect("Failed to register forecast_accuracy"),

            stages_skipped: register_int_counter_vec!(
                "growth_analyzer_stages_skipped_total",
                "Stages skipped for recoverable reasons",
                &["stage"]
            )
            .expect("Failed to register stages_skipped_total"),

            runs: register_int_counter_vec!(
                "growth_analyzer_runs_total",
                "Finished runs by outcome",
                &["outcome"]
            )
            .expect("Failed to register runs_total"),
        }
    }
}

/// Run metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance; clones share it.
#[derive(Clone)]
pub struct AnalyzerMetrics {
    _private: (),
}

impl Default for AnalyzerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalyzerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AnalyzerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AnalyzerMetricsInner {
        GLOBAL_METRICS.get_or_init(AnalyzerMetricsInner::new)
    }

    pub fn observe_run_duration(&self, duration_secs: f64) {
        self.inner().run_duration_seconds.observe(duration_secs);
    }

    pub fn observe_stage_duration(&self, stage: &str, duration_secs: f64) {
        self.inner()
            .stage_duration_seconds
            .with_label_values(&[stage])
            .observe(duration_secs);
    }

    pub fn set_samples_analyzed(&self, count: usize) {
        self.inner()
            .samples_analyzed
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Replace the per-category anomaly counts with those of this run
    pub fn set_anomalies(&self, anomalies: &[AnomalyEvent]) {
        let gauge = &self.inner().anomalies_detected;
        gauge.reset();
        for event in anomalies {
            gauge.with_label_values(&[event.category.as_str()]).inc();
        }
    }

    pub fn set_health_score(&self, score: f64) {
        self.inner().health_score.set(score);
    }

    pub fn set_forecast_accuracy(&self, target: &str, accuracy: f64) {
        self.inner()
            .forecast_accuracy
            .with_label_values(&[target])
            .set(accuracy);
    }

    pub fn inc_stage_skipped(&self, stage: &str) {
        self.inner().stages_skipped.with_label_values(&[stage]).inc();
    }

    /// Count a finished run; `outcome` is `completed`, `partial` or an error kind
    pub fn inc_run(&self, outcome: &str) {
        self.inner().runs.with_label_values(&[outcome]).inc();
    }

    /// Encode every registered metric in text format
    pub fn render(&self) -> String {
        let families = prometheus::gather();
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&families, &mut buffer) {
            warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }

    /// Write [`METRICS_FILE`] into `output_dir` for a textfile collector
    pub fn write_textfile(&self, output_dir: &Path) -> Result<PathBuf> {
        let path = output_dir.join(METRICS_FILE);
        atomic_write(&path, self.render().as_bytes())?;
        Ok(path)
    }
}

/// Structured logger for run lifecycle events
///
/// Every event carries the run id so one run's lines can be grepped out of
/// a shared log.
#[derive(Clone)]
pub struct StructuredLogger {
    run_id: String,
}

impl StructuredLogger {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn log_run_started(&self, mode: &str, samples: usize) {
        info!(
            event = "run_started",
            run_id = %self.run_id,
            mode = %mode,
            samples = samples,
            "Analysis run started"
        );
    }

    pub fn log_stage_completed(&self, stage: &str, duration_ms: u64) {
        info!(
            event = "stage_completed",
            run_id = %self.run_id,
            stage = %stage,
            duration_ms = duration_ms,
            "Stage completed"
        );
    }

    pub fn log_stage_skipped(&self, stage: &str, reason: &str) {
        warn!(
            event = "stage_skipped",
            run_id = %self.run_id,
            stage = %stage,
            reason = %reason,
            "Stage skipped"
        );
    }

    pub fn log_forecast(&self, forecast: &ForecastResult) {
        info!(
            event = "forecast_generated",
            run_id = %self.run_id,
            target = %forecast.target_metric,
            horizon_days = forecast.horizon_days,
            accuracy = forecast.model_accuracy,
            trend = ?forecast.trend_direction,
            "Generated forecast"
        );
    }

    pub fn log_anomaly(&self, event: &AnomalyEvent) {
        info!(
            event = "anomaly_detected",
            run_id = %self.run_id,
            category = %event.category.as_str(),
            score = event.anomaly_score,
            sample_timestamp = %event.source_sample_timestamp,
            "Anomaly detected"
        );
    }

    pub fn log_health(&self, health: &HealthScore) {
        match health.status {
            HealthStatus::Critical => {
                warn!(
                    event = "health_scored",
                    run_id = %self.run_id,
                    score = health.score,
                    status = ?health.status,
                    "System health is critical"
                );
            }
            _ => {
                info!(
                    event = "health_scored",
                    run_id = %self.run_id,
                    score = health.score,
                    status = ?health.status,
                    "Health scored"
                );
            }
        }
    }

    pub fn log_run_completed(&self, duration_ms: u64, partial: bool, artifacts: usize) {
        info!(
            event = "run_completed",
            run_id = %self.run_id,
            duration_ms = duration_ms,
            partial = partial,
            artifacts = artifacts,
            "Analysis run completed"
        );
    }

    pub fn log_run_failed(&self, kind: &str, message: &str) {
        error!(
            event = "run_failed",
            run_id = %self.run_id,
            kind = %kind,
            error = %message,
            "Analysis run failed"
        );
    }
}
