//! Run orchestration
//!
//! One run:
//! 1. takes the run lock and fixes the snapshot window at `started_at`
//! 2. runs the analysis stages on a blocking task under the wall-clock budget
//! 3. commits outputs (store rows, charts, report, metrics file)
//!
//! Stages fail soft: insufficient or degenerate data marks the stage skipped
//! and the run continues. Nothing is committed once the budget is spent.

use crate::anomaly::AnomalyDetector;
use crate::collector::{load_samples, HostCollector, SampleCollector};
use crate::config::AnalysisConfig;
use crate::error::{AnalysisError, Result};
use crate::health::HealthScorer;
use crate::lock::RunLock;
use crate::models::{
    AnomalyEvent, ForecastResult, HealthScore, MetricName, MetricSample, Recommendation,
};
use crate::observability::{AnalyzerMetrics, StructuredLogger};
use crate::predictor::{daily_rollup, FeatureBuilder, TrendForecaster};
use crate::recommend::RecommendationGenerator;
use crate::report::{
    anomaly_chart, file_stamp, forecast_chart, Chart, ReportDocument, ReportWriter, RunMeta,
    SnapshotWindow, StageReport,
};
use crate::store::{HealthSnapshot, MetricsStore, RunRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Which part of the analysis a run produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Comprehensive,
    Trends,
    Anomalies,
    Recommendations,
    Charts,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Comprehensive => "comprehensive",
            RunMode::Trends => "trends",
            RunMode::Anomalies => "anomalies",
            RunMode::Recommendations => "recommendations",
            RunMode::Charts => "charts",
        }
    }

    pub fn needs_forecast(&self) -> bool {
        !matches!(self, RunMode::Anomalies)
    }

    pub fn needs_anomalies(&self) -> bool {
        !matches!(self, RunMode::Trends)
    }

    pub fn needs_health(&self) -> bool {
        matches!(self, RunMode::Comprehensive | RunMode::Recommendations)
    }

    pub fn needs_recommendations(&self) -> bool {
        self.needs_health()
    }

    /// Stage outputs are saved to the store
    pub fn persists(&self) -> bool {
        !matches!(self, RunMode::Charts)
    }

    pub fn writes_report(&self) -> bool {
        matches!(self, RunMode::Comprehensive)
    }

    pub fn writes_charts(&self) -> bool {
        matches!(self, RunMode::Comprehensive | RunMode::Charts)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "comprehensive" => Ok(RunMode::Comprehensive),
            "trends" | "predict" => Ok(RunMode::Trends),
            "anomalies" => Ok(RunMode::Anomalies),
            "recommendations" => Ok(RunMode::Recommendations),
            "charts" => Ok(RunMode::Charts),
            other => Err(AnalysisError::InvalidConfig(format!("unknown run mode '{}'", other))),
        }
    }
}

/// Everything a finished run produced
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub report: ReportDocument,
    /// Set only in modes that write the JSON report
    pub report_path: Option<PathBuf>,
    pub chart_paths: Vec<PathBuf>,
}

impl RunOutcome {
    pub fn is_partial(&self) -> bool {
        self.report.is_partial()
    }
}

/// Stage results held between the analysis and commit phases
struct Analysis {
    samples: Vec<MetricSample>,
    window: SnapshotWindow,
    previous_health: Option<HealthSnapshot>,
    forecasts: Vec<ForecastResult>,
    /// `None` when the anomaly stage did not complete
    anomalies: Option<Vec<AnomalyEvent>>,
    health: Option<HealthScore>,
    recommendations: Vec<Recommendation>,
    stages: Vec<StageReport>,
}

/// Runs stages in order, checking the deadline before each one
struct StageRunner<'a> {
    deadline: Instant,
    budget: Duration,
    logger: &'a StructuredLogger,
    metrics: &'a AnalyzerMetrics,
    stages: Vec<StageReport>,
}

impl<'a> StageRunner<'a> {
    fn check_deadline(&self) -> Result<()> {
        if Instant::now() >= self.deadline {
            return Err(AnalysisError::Timeout(self.budget));
        }
        Ok(())
    }

    /// Run one stage. Recoverable errors become a skipped stage (`Ok(None)`),
    /// everything else aborts the run.
    fn run<T>(&mut self, name: &str, stage: impl FnOnce() -> Result<T>) -> Result<Option<T>> {
        self.check_deadline()?;
        let start = Instant::now();
        let result = stage();
        let elapsed = start.elapsed();
        let duration_ms = elapsed.as_millis() as u64;
        self.metrics
            .observe_stage_duration(name, elapsed.as_secs_f64());

        match result {
            Ok(value) => {
                self.logger.log_stage_completed(name, duration_ms);
                self.stages.push(StageReport::completed(name, duration_ms));
                Ok(Some(value))
            }
            Err(e) if e.is_recoverable() => {
                self.record_skip(name, &e.to_string(), duration_ms);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn skip(&mut self, name: &str, reason: &str) {
        self.record_skip(name, reason, 0);
    }

    fn record_skip(&mut self, name: &str, reason: &str, duration_ms: u64) {
        self.logger.log_stage_skipped(name, reason);
        self.metrics.inc_stage_skipped(name);
        self.stages
            .push(StageReport::skipped(name, reason, duration_ms));
    }
}

/// Entry point for analysis runs, sample collection and import
pub struct Analyzer {
    config: AnalysisConfig,
    metrics: AnalyzerMetrics,
}

impl Analyzer {
    /// Validate `config` once; every run reuses it unchanged
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            metrics: AnalyzerMetrics::new(),
        })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub async fn run(&self, mode: RunMode) -> Result<RunOutcome> {
        self.run_at(mode, Utc::now()).await
    }

    /// Run with the snapshot cutoff at `started_at`
    pub async fn run_at(&self, mode: RunMode, started_at: DateTime<Utc>) -> Result<RunOutcome> {
        self.run_with_budget(mode, started_at, self.config.run_timeout())
            .await
    }

    /// Run with an explicit wall-clock budget.
    ///
    /// # Errors
    /// * `ConcurrentRun` when another run holds the lock
    /// * `Timeout` when the budget is spent before commit; nothing is written
    /// * `Store` / `TaskFailed` for storage failures and panicked stages
    pub async fn run_with_budget(
        &self,
        mode: RunMode,
        started_at: DateTime<Utc>,
        budget: Duration,
    ) -> Result<RunOutcome> {
        let clock = Instant::now();
        let deadline = clock + budget;
        let run_id = format!("run-{}", file_stamp(started_at));
        let logger = StructuredLogger::new(run_id.clone());

        let _lock = RunLock::acquire(&self.config.lock_path())?;

        let result = self
            .execute(mode, started_at, budget, deadline, &run_id, &logger)
            .await;

        let elapsed = clock.elapsed();
        self.metrics.observe_run_duration(elapsed.as_secs_f64());
        match &result {
            Ok(outcome) => {
                let outcome_label = if outcome.is_partial() { "partial" } else { "completed" };
                self.metrics.inc_run(outcome_label);
                if let Err(e) = self.metrics.write_textfile(&self.config.output_dir) {
                    warn!(error = %e, "Failed to export run metrics");
                }
                logger.log_run_completed(
                    elapsed.as_millis() as u64,
                    outcome.is_partial(),
                    outcome.chart_paths.len() + usize::from(outcome.report_path.is_some()),
                );
            }
            Err(e) => {
                self.metrics.inc_run(e.kind());
                logger.log_run_failed(e.kind(), &e.to_string());
            }
        }
        result
    }

    async fn execute(
        &self,
        mode: RunMode,
        started_at: DateTime<Utc>,
        budget: Duration,
        deadline: Instant,
        run_id: &str,
        logger: &StructuredLogger,
    ) -> Result<RunOutcome> {
        let config = self.config.clone();
        let task_logger = logger.clone();
        let task_metrics = self.metrics.clone();
        let analysis = tokio::task::spawn_blocking(move || {
            analyse(
                &config,
                mode,
                started_at,
                deadline,
                budget,
                &task_logger,
                &task_metrics,
            )
        });

        let analysis = match tokio::time::timeout(budget, analysis).await {
            Err(_) => return Err(AnalysisError::Timeout(budget)),
            Ok(Err(join)) => return Err(AnalysisError::TaskFailed(join.to_string())),
            Ok(Ok(result)) => result?,
        };

        if Instant::now() >= deadline {
            return Err(AnalysisError::Timeout(budget));
        }
        self.record_metrics(&analysis);

        let config = self.config.clone();
        let run_id = run_id.to_string();
        tokio::task::spawn_blocking(move || commit(&config, mode, &run_id, started_at, analysis))
            .await
            .map_err(|e| AnalysisError::TaskFailed(e.to_string()))?
    }

    fn record_metrics(&self, analysis: &Analysis) {
        self.metrics.set_samples_analyzed(analysis.samples.len());
        if let Some(anomalies) = &analysis.anomalies {
            self.metrics.set_anomalies(anomalies);
        }
        if let Some(health) = &analysis.health {
            self.metrics.set_health_score(health.score);
        }
        for forecast in &analysis.forecasts {
            self.metrics
                .set_forecast_accuracy(forecast.target_metric.as_str(), forecast.model_accuracy);
        }
    }

    /// Take one live sample and append it to the store
    pub async fn collect(&self) -> Result<MetricSample> {
        let database_path = self.config.database_path.clone();
        let previous =
            tokio::task::spawn_blocking(move || -> Result<Option<MetricSample>> {
                MetricsStore::open(&database_path)?.latest()
            })
            .await
            .map_err(|e| AnalysisError::TaskFailed(e.to_string()))??;

        let collector = HostCollector::new(&self.config.collector)?
            .with_fallback_count(previous.map(|s| s.memory_count).unwrap_or(0));
        self.collect_with(&collector).await
    }

    /// Append one sample from any collector
    pub async fn collect_with(&self, collector: &dyn SampleCollector) -> Result<MetricSample> {
        let sample = collector.collect().await?;
        let database_path = self.config.database_path.clone();
        let stored = sample.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            MetricsStore::open(&database_path)?.append(&stored)
        })
        .await
        .map_err(|e| AnalysisError::TaskFailed(e.to_string()))??;

        info!(
            event = "sample_collected",
            timestamp = %sample.timestamp,
            memory_count = sample.memory_count,
            "Sample appended"
        );
        Ok(sample)
    }

    /// Append every sample of a JSON file in one transaction
    pub async fn import(&self, path: &Path) -> Result<usize> {
        let path = path.to_path_buf();
        let database_path = self.config.database_path.clone();
        let imported = tokio::task::spawn_blocking(move || -> Result<usize> {
            let samples = load_samples(&path)?;
            MetricsStore::open(&database_path)?.append_batch(&samples)
        })
        .await
        .map_err(|e| AnalysisError::TaskFailed(e.to_string()))??;

        info!(event = "samples_imported", count = imported, "Samples imported");
        Ok(imported)
    }
}

fn primary_target(config: &AnalysisConfig) -> MetricName {
    config
        .forecast
        .targets
        .first()
        .copied()
        .unwrap_or(MetricName::MemoryCount)
}

fn analyse(
    config: &AnalysisConfig,
    mode: RunMode,
    started_at: DateTime<Utc>,
    deadline: Instant,
    budget: Duration,
    logger: &StructuredLogger,
    metrics: &AnalyzerMetrics,
) -> Result<Analysis> {
    let store = MetricsStore::open(&config.database_path)?;
    let window = SnapshotWindow {
        since: started_at - chrono::Duration::days(i64::from(config.analysis_period_days)),
        until: started_at,
    };
    let samples = store.query(window.since, window.until)?;
    let previous_health = store.health_history(1)?.into_iter().next();
    drop(store);

    logger.log_run_started(mode.as_str(), samples.len());

    let mut runner = StageRunner {
        deadline,
        budget,
        logger,
        metrics,
        stages: Vec::new(),
    };
    let builder = FeatureBuilder::new(config.min_data_points.feature_window);

    let mut forecasts = Vec::new();
    if mode.needs_forecast() {
        let forecaster = TrendForecaster::new(config);
        let daily = daily_rollup(&samples);
        for &target in &config.forecast.targets {
            let stage = format!("forecast:{}", target);
            let forecast = runner.run(&stage, || {
                let features = builder.build_features(&daily, target)?;
                let model = forecaster.fit(&features, target)?;
                Ok(forecaster.predict_at(&model, config.prediction_horizon_days, started_at))
            })?;
            if let Some(forecast) = forecast {
                logger.log_forecast(&forecast);
                forecasts.push(forecast);
            }
        }
    }

    let primary = primary_target(config);
    let anomalies = if mode.needs_anomalies() {
        let detector = AnomalyDetector::new(config);
        let events = runner.run("anomalies", || {
            let features = builder.build_features(&samples, primary)?;
            let trained = detector.fit(&features)?;
            Ok(detector.detect(&trained, &features, started_at))
        })?;
        for event in events.iter().flatten() {
            logger.log_anomaly(event);
        }
        events
    } else {
        None
    };

    let mut health = None;
    if mode.needs_health() {
        match (samples.last(), &anomalies) {
            (None, _) => runner.skip("health", "no samples in analysis window"),
            (Some(_), None) => runner.skip("health", "anomaly stage was skipped"),
            (Some(latest), Some(events)) => {
                let scorer = HealthScorer::new(config);
                let primary_forecast = forecasts.iter().find(|f| f.target_metric == primary);
                health = runner.run("health", || {
                    let recent = scorer.recent(latest, events);
                    Ok(scorer.score(latest, &recent, primary_forecast))
                })?;
                if let Some(score) = &health {
                    logger.log_health(score);
                }
            }
        }
    }

    let mut recommendations = Vec::new();
    if mode.needs_recommendations() {
        match &health {
            None => runner.skip("recommendations", "health stage was skipped"),
            Some(score) => {
                let generator = RecommendationGenerator::new(config);
                let events = anomalies.as_deref().unwrap_or_default();
                recommendations = runner
                    .run("recommendations", || Ok(generator.generate(score, events, &forecasts)))?
                    .unwrap_or_default();
            }
        }
    }

    runner.check_deadline()?;
    debug!(stages = runner.stages.len(), "Analysis stages finished");

    Ok(Analysis {
        samples,
        window,
        previous_health,
        forecasts,
        anomalies,
        health,
        recommendations,
        stages: runner.stages,
    })
}

fn commit(
    config: &AnalysisConfig,
    mode: RunMode,
    run_id: &str,
    started_at: DateTime<Utc>,
    analysis: Analysis,
) -> Result<RunOutcome> {
    let writer = ReportWriter::new(&config.output_dir);
    let mut charts = Vec::new();
    if mode.writes_charts() {
        let stamp = file_stamp(started_at);
        for forecast in &analysis.forecasts {
            charts.push(forecast_chart(&analysis.samples, forecast, &stamp));
        }
        if let Some(events) = &analysis.anomalies {
            charts.push(anomaly_chart(&analysis.samples, events, &stamp));
        }
    }

    let meta = RunMeta {
        run_id: run_id.to_string(),
        generated_at: started_at,
        mode: mode.as_str().to_string(),
        window: analysis.window,
        samples_analyzed: analysis.samples.len(),
        previous_health: analysis.previous_health,
    };
    let mut report = ReportDocument::render(
        meta,
        analysis.health,
        analysis.forecasts,
        analysis.anomalies.unwrap_or_default(),
        analysis.recommendations,
        analysis.stages,
    );
    report.charts = charts.iter().map(Chart::artifact).collect();

    let write_artifacts = || -> Result<(Vec<PathBuf>, Option<PathBuf>)> {
        let chart_paths = charts
            .iter()
            .map(|chart| writer.write_chart(chart))
            .collect::<Result<Vec<_>>>()?;
        let report_path = if mode.writes_report() {
            Some(writer.write_report(&report)?)
        } else {
            None
        };
        Ok((chart_paths, report_path))
    };

    // Rows commit only after every artifact is on disk
    let (chart_paths, report_path) = if mode.persists() {
        let mut store = MetricsStore::open(&config.database_path)?;
        let record = RunRecord {
            run_id,
            recorded_at: started_at,
            forecasts: &report.forecasts,
            anomalies: &report.anomalies,
            health: report.health.as_ref(),
            recommendations: &report.recommendations,
        };
        store.save_run_with(&record, write_artifacts)?
    } else {
        write_artifacts()?
    };

    Ok(RunOutcome {
        report,
        report_path,
        chart_paths,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_stage_matrix() {
        assert!(RunMode::Comprehensive.needs_forecast());
        assert!(RunMode::Comprehensive.needs_recommendations());
        assert!(!RunMode::Trends.needs_anomalies());
        assert!(!RunMode::Anomalies.needs_forecast());
        assert!(!RunMode::Anomalies.needs_health());
        assert!(RunMode::Recommendations.needs_forecast() && RunMode::Recommendations.needs_anomalies());
        assert!(RunMode::Charts.writes_charts() && !RunMode::Charts.persists());
        assert!(!RunMode::Trends.writes_report());
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("predict".parse::<RunMode>().unwrap(), RunMode::Trends);
        assert_eq!("charts".parse::<RunMode>().unwrap(), RunMode::Charts);
        assert!("everything".parse::<RunMode>().is_err());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = AnalysisConfig {
            anomaly_threshold: 0.9,
            ..AnalysisConfig::default()
        };
        let err = Analyzer::new(config).err().unwrap();
        assert!(matches!(err, AnalysisError::InvalidConfig(_)));
    }
}
