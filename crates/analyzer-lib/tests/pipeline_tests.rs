//! End-to-end runs against a scratch store and output directory

use analyzer_lib::collector::{async_trait, SampleCollector};
use analyzer_lib::lock::RunLock;
use analyzer_lib::recommend::CAPACITY_PLANNING;
use analyzer_lib::report::{ReportWriter, StageStatus, LATEST_POINTER};
use analyzer_lib::{
    AnalysisConfig, AnalysisError, Analyzer, HealthStatus, MetricSample, MetricsStore, RunMode,
    TrendDirection,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::path::Path;
use tempfile::TempDir;

fn config_in(dir: &Path) -> AnalysisConfig {
    AnalysisConfig {
        database_path: dir.join("metrics.db"),
        output_dir: dir.join("reports"),
        ..AnalysisConfig::default()
    }
}

fn day(i: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + Duration::days(i)
}

/// One sample per day for `days` days; memory count grows by 10 a day
fn seed_growth(config: &AnalysisConfig, days: i64) -> DateTime<Utc> {
    let mut store = MetricsStore::open(&config.database_path).unwrap();
    let samples: Vec<MetricSample> = (0..days)
        .map(|i| {
            let wobble = (i % 3) as f64;
            MetricSample::new(
                day(i),
                100 + 10 * i as u64,
                40.0 + wobble,
                25.0 + wobble,
                35.0 + wobble,
                30.0 + 0.1 * i as f64,
            )
            .unwrap()
        })
        .collect();
    store.append_batch(&samples).unwrap();
    day(days - 1) + Duration::hours(1)
}

fn report_files(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .filter(|name| name.starts_with("report_"))
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn test_comprehensive_run_on_thirty_days_of_growth() {
    let temp = TempDir::new().unwrap();
    let config = config_in(temp.path());
    let started_at = seed_growth(&config, 30);
    let analyzer = Analyzer::new(config.clone()).unwrap();

    let outcome = analyzer
        .run_at(RunMode::Comprehensive, started_at)
        .await
        .unwrap();
    let report = &outcome.report;

    assert!(!outcome.is_partial(), "stages: {:?}", report.stages);
    assert_eq!(report.samples_analyzed, 30);
    assert!(report.stages.iter().all(|s| s.status == StageStatus::Completed));

    let forecast = &report.forecasts[0];
    assert_eq!(forecast.predicted_series.len(), 90);
    assert_eq!(forecast.trend_direction, TrendDirection::Increasing);
    assert!(forecast.model_accuracy > 0.9);

    let health = report.health.as_ref().unwrap();
    assert_eq!(health.status, HealthStatus::Healthy);
    assert!(report
        .recommendations
        .iter()
        .any(|r| r.category == CAPACITY_PLANNING));

    // Report, pointer, two charts and the metrics export
    let report_path = outcome.report_path.as_ref().unwrap();
    assert!(report_path.exists());
    assert_eq!(outcome.chart_paths.len(), 2);
    assert!(outcome.chart_paths.iter().all(|p| p.exists()));
    assert_eq!(report.charts.len(), 2);
    assert!(report
        .charts
        .iter()
        .all(|c| c.media_type == "image/svg+xml" && config.output_dir.join(&c.file_name).exists()));
    assert!(config.output_dir.join(LATEST_POINTER).exists());
    assert!(config.output_dir.join("metrics.prom").exists());

    let latest = ReportWriter::new(&config.output_dir).read_latest().unwrap();
    assert_eq!(latest.as_ref().map(|r| r.run_id.as_str()), Some(report.run_id.as_str()));

    let store = MetricsStore::open(&config.database_path).unwrap();
    let history = store.health_history(5).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].run_id, report.run_id);
    assert!(store.latest_forecast("memory_count").unwrap().is_some());
}

/// Memory count climbs linearly from 100 to 400 over `days` daily samples
/// while latency holds at 50 ms and resources stay low
fn seed_linear_growth(config: &AnalysisConfig, days: i64) -> DateTime<Utc> {
    let mut store = MetricsStore::open(&config.database_path).unwrap();
    let samples: Vec<MetricSample> = (0..days)
        .map(|i| {
            let count = 100.0 + 300.0 * i as f64 / (days - 1) as f64;
            MetricSample::new(day(i), count.round() as u64, 50.0, 20.0, 30.0, 40.0).unwrap()
        })
        .collect();
    store.append_batch(&samples).unwrap();
    day(days - 1) + Duration::hours(1)
}

#[tokio::test]
async fn test_linear_growth_with_flat_latency() {
    let temp = TempDir::new().unwrap();
    let config = config_in(temp.path());
    let started_at = seed_linear_growth(&config, 30);
    let analyzer = Analyzer::new(config).unwrap();

    let outcome = analyzer
        .run_at(RunMode::Comprehensive, started_at)
        .await
        .unwrap();
    let report = &outcome.report;

    assert_eq!(report.forecasts[0].trend_direction, TrendDirection::Increasing);
    assert!(
        report.anomaly_summary.get("performance").is_none(),
        "summary: {:?}",
        report.anomaly_summary
    );
    assert_eq!(report.health.as_ref().unwrap().status, HealthStatus::Healthy);
}

#[tokio::test]
async fn test_unwritable_output_leaves_no_run_behind() {
    let temp = TempDir::new().unwrap();
    let blocked = temp.path().join("reports");
    std::fs::write(&blocked, b"not a directory").unwrap();
    let config = AnalysisConfig {
        lock_path: Some(temp.path().join("run.lock")),
        ..config_in(temp.path())
    };
    let started_at = seed_growth(&config, 30);
    let analyzer = Analyzer::new(config.clone()).unwrap();

    let err = analyzer
        .run_at(RunMode::Comprehensive, started_at)
        .await
        .unwrap_err();
    assert!(matches!(err, AnalysisError::Store(_)), "got {:?}", err);
    assert_eq!(err.exit_code(), 5);

    let store = MetricsStore::open(&config.database_path).unwrap();
    assert!(store.health_history(5).unwrap().is_empty());
    assert!(store.latest_forecast("memory_count").unwrap().is_none());
    assert_eq!(store.sample_count().unwrap(), 30);
}

#[tokio::test]
async fn test_second_run_reports_previous_health() {
    let temp = TempDir::new().unwrap();
    let config = config_in(temp.path());
    let started_at = seed_growth(&config, 30);
    let analyzer = Analyzer::new(config).unwrap();

    let first = analyzer
        .run_at(RunMode::Comprehensive, started_at)
        .await
        .unwrap();
    let second = analyzer
        .run_at(RunMode::Comprehensive, started_at + Duration::minutes(5))
        .await
        .unwrap();

    let previous = second.report.previous_health.as_ref().unwrap();
    assert_eq!(previous.run_id, first.report.run_id);
    assert!(first.report_path.unwrap().exists());
}

#[tokio::test]
async fn test_two_samples_skip_stages_but_still_report() {
    let temp = TempDir::new().unwrap();
    let config = config_in(temp.path());
    let started_at = seed_growth(&config, 2);
    let analyzer = Analyzer::new(config).unwrap();

    let outcome = analyzer
        .run_at(RunMode::Comprehensive, started_at)
        .await
        .unwrap();

    assert!(outcome.is_partial());
    assert!(outcome.report_path.unwrap().exists());
    let report = outcome.report;
    assert!(report.forecasts.is_empty());
    assert!(report.health.is_none());
    assert!(report.recommendations.is_empty());

    let forecast_stage = report
        .stages
        .iter()
        .find(|s| s.name == "forecast:memory_count")
        .unwrap();
    assert_eq!(forecast_stage.status, StageStatus::Skipped);
    assert!(forecast_stage
        .reason
        .as_deref()
        .unwrap()
        .contains("insufficient data"));
    assert!(report.stages.iter().all(|s| s.is_skipped()));
}

#[tokio::test]
async fn test_empty_store_skips_every_stage() {
    let temp = TempDir::new().unwrap();
    let config = config_in(temp.path());
    let analyzer = Analyzer::new(config).unwrap();

    let outcome = analyzer
        .run_at(RunMode::Recommendations, day(0))
        .await
        .unwrap();
    assert_eq!(outcome.report.samples_analyzed, 0);
    assert!(outcome.is_partial());
    // Only comprehensive runs write the report file
    assert!(outcome.report_path.is_none());
}

#[tokio::test]
async fn test_concurrent_run_fails_fast() {
    let temp = TempDir::new().unwrap();
    let config = config_in(temp.path());
    let started_at = seed_growth(&config, 30);
    let _held = RunLock::acquire(&config.lock_path()).unwrap();

    let analyzer = Analyzer::new(config.clone()).unwrap();
    let err = analyzer
        .run_at(RunMode::Comprehensive, started_at)
        .await
        .unwrap_err();

    assert!(matches!(err, AnalysisError::ConcurrentRun(_)));
    assert_eq!(err.exit_code(), 7);
    assert!(report_files(&config.output_dir).is_empty());
}

#[tokio::test]
async fn test_timeout_writes_nothing() {
    let temp = TempDir::new().unwrap();
    let config = config_in(temp.path());
    let started_at = seed_growth(&config, 30);
    let analyzer = Analyzer::new(config.clone()).unwrap();

    let err = analyzer
        .run_with_budget(RunMode::Comprehensive, started_at, std::time::Duration::ZERO)
        .await
        .unwrap_err();

    assert!(matches!(err, AnalysisError::Timeout(_)));
    assert!(report_files(&config.output_dir).is_empty());
    assert!(!config.output_dir.join(LATEST_POINTER).exists());
    let store = MetricsStore::open(&config.database_path).unwrap();
    assert!(store.health_history(1).unwrap().is_empty());
}

#[tokio::test]
async fn test_identical_inputs_give_identical_results() {
    let mut reports = Vec::new();
    for _ in 0..2 {
        let temp = TempDir::new().unwrap();
        let config = config_in(temp.path());
        let started_at = seed_growth(&config, 30);
        let analyzer = Analyzer::new(config).unwrap();
        let outcome = analyzer
            .run_at(RunMode::Comprehensive, started_at)
            .await
            .unwrap();
        reports.push(outcome.report);
    }

    assert_eq!(reports[0].forecasts, reports[1].forecasts);
    assert_eq!(reports[0].anomalies, reports[1].anomalies);
    assert_eq!(reports[0].health, reports[1].health);
    assert_eq!(reports[0].recommendations, reports[1].recommendations);
}

#[tokio::test]
async fn test_charts_mode_does_not_persist() {
    let temp = TempDir::new().unwrap();
    let config = config_in(temp.path());
    let started_at = seed_growth(&config, 30);
    let analyzer = Analyzer::new(config.clone()).unwrap();

    let outcome = analyzer.run_at(RunMode::Charts, started_at).await.unwrap();
    assert_eq!(outcome.chart_paths.len(), 2);
    assert!(outcome.report_path.is_none());

    let store = MetricsStore::open(&config.database_path).unwrap();
    assert!(store.latest_forecast("memory_count").unwrap().is_none());
}

#[tokio::test]
async fn test_import_appends_validated_samples() {
    let temp = TempDir::new().unwrap();
    let config = config_in(temp.path());
    let file = temp.path().join("handoff.json");
    std::fs::write(
        &file,
        r#"[{"timestamp": "2024-05-01T00:00:00Z", "memory_count": 5, "api_response_time_ms": 8.0,
             "cpu_percent": 10.0, "memory_percent": 20.0, "disk_percent": 30.0}]"#,
    )
    .unwrap();

    let analyzer = Analyzer::new(config.clone()).unwrap();
    assert_eq!(analyzer.import(&file).await.unwrap(), 1);

    let store = MetricsStore::open(&config.database_path).unwrap();
    assert_eq!(store.sample_count().unwrap(), 1);
}

struct FixedCollector(MetricSample);

#[async_trait]
impl SampleCollector for FixedCollector {
    async fn collect(&self) -> analyzer_lib::Result<MetricSample> {
        Ok(self.0.clone())
    }
}

#[tokio::test]
async fn test_collect_with_appends_sample() {
    let temp = TempDir::new().unwrap();
    let config = config_in(temp.path());
    let analyzer = Analyzer::new(config.clone()).unwrap();
    let sample = MetricSample::new(day(0), 77, 12.0, 5.0, 6.0, 7.0).unwrap();

    let stored = analyzer
        .collect_with(&FixedCollector(sample.clone()))
        .await
        .unwrap();
    assert_eq!(stored, sample);

    let store = MetricsStore::open(&config.database_path).unwrap();
    assert_eq!(store.latest().unwrap(), Some(sample));
}
