//! Run report document and artifact output
//!
//! Every artifact is written to a temporary file in the output directory,
//! synced, then renamed over its final name. A failed run never leaves a
//! half-written report behind and never touches the previous one.

pub mod charts;

pub use charts::{anomaly_chart, forecast_chart, Chart, ChartArtifact};

use crate::error::Result;
use crate::models::{AnomalyEvent, ForecastResult, HealthScore, Recommendation};
use crate::store::HealthSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const LATEST_POINTER: &str = "latest.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Completed,
    Skipped,
}

/// Outcome of one pipeline stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub name: String,
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub duration_ms: u64,
}

impl StageReport {
    pub fn completed(name: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            name: name.into(),
            status: StageStatus::Completed,
            reason: None,
            duration_ms,
        }
    }

    pub fn skipped(name: impl Into<String>, reason: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            name: name.into(),
            status: StageStatus::Skipped,
            reason: Some(reason.into()),
            duration_ms,
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.status == StageStatus::Skipped
    }
}

/// Inclusive time range the run analysed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SnapshotWindow {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

/// Run identity and context shared by every section of the report
#[derive(Debug, Clone)]
pub struct RunMeta {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub mode: String,
    pub window: SnapshotWindow,
    pub samples_analyzed: usize,
    pub previous_health: Option<HealthSnapshot>,
}

/// Full JSON report of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDocument {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub mode: String,
    pub window: SnapshotWindow,
    pub samples_analyzed: usize,
    pub stages: Vec<StageReport>,
    pub health: Option<HealthScore>,
    pub previous_health: Option<HealthSnapshot>,
    pub forecasts: Vec<ForecastResult>,
    pub anomaly_summary: BTreeMap<String, usize>,
    pub anomalies: Vec<AnomalyEvent>,
    pub recommendations: Vec<Recommendation>,
    /// Chart files written alongside this report
    #[serde(default)]
    pub charts: Vec<ChartArtifact>,
}

impl ReportDocument {
    pub fn render(
        meta: RunMeta,
        health: Option<HealthScore>,
        forecasts: Vec<ForecastResult>,
        anomalies: Vec<AnomalyEvent>,
        recommendations: Vec<Recommendation>,
        stages: Vec<StageReport>,
    ) -> Self {
        let mut anomaly_summary = BTreeMap::new();
        for event in &anomalies {
            *anomaly_summary
                .entry(event.category.as_str().to_string())
                .or_insert(0) += 1;
        }

        Self {
            run_id: meta.run_id,
            generated_at: meta.generated_at,
            mode: meta.mode,
            window: meta.window,
            samples_analyzed: meta.samples_analyzed,
            stages,
            health,
            previous_health: meta.previous_health,
            forecasts,
            anomaly_summary,
            anomalies,
            recommendations,
            charts: Vec::new(),
        }
    }

    /// True when at least one stage was skipped
    pub fn is_partial(&self) -> bool {
        self.stages.iter().any(|s| s.is_skipped())
    }

    pub fn file_name(&self) -> String {
        format!("report_{}.json", file_stamp(self.generated_at))
    }
}

/// Contents of `latest.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestPointer {
    pub report: String,
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub partial: bool,
}

/// Timestamp fragment used in artifact file names
pub fn file_stamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%S%3fZ").to_string()
}

/// Writes reports and charts into the output directory
pub struct ReportWriter {
    output_dir: PathBuf,
}

impl ReportWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write the report, then repoint `latest.json` at it
    pub fn write_report(&self, report: &ReportDocument) -> Result<PathBuf> {
        let path = self.output_dir.join(report.file_name());
        atomic_write(&path, &serde_json::to_vec_pretty(report)?)?;

        let pointer = LatestPointer {
            report: report.file_name(),
            run_id: report.run_id.clone(),
            generated_at: report.generated_at,
            partial: report.is_partial(),
        };
        atomic_write(
            &self.output_dir.join(LATEST_POINTER),
            &serde_json::to_vec_pretty(&pointer)?,
        )?;
        debug!(path = %path.display(), "Report written");
        Ok(path)
    }

    pub fn write_chart(&self, chart: &Chart) -> Result<PathBuf> {
        let path = self.output_dir.join(&chart.file_name);
        atomic_write(&path, chart.svg.as_bytes())?;
        Ok(path)
    }

    /// Resolve `latest.json` to the report it points at
    pub fn read_latest(&self) -> Result<Option<ReportDocument>> {
        let pointer_path = self.output_dir.join(LATEST_POINTER);
        if !pointer_path.exists() {
            return Ok(None);
        }
        let pointer: LatestPointer = serde_json::from_slice(&std::fs::read(&pointer_path)?)?;
        let report = std::fs::read(self.output_dir.join(&pointer.report))?;
        Ok(Some(serde_json::from_slice(&report)?))
    }
}

/// Write to `<path>.tmp`, sync, then rename over `path`
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;

    std::fs::rename(&temp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnomalyCategory, HealthStatus, MetricSnapshot};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn meta(at: DateTime<Utc>) -> RunMeta {
        RunMeta {
            run_id: format!("run-{}", file_stamp(at)),
            generated_at: at,
            mode: "comprehensive".into(),
            window: SnapshotWindow {
                since: at - chrono::Duration::days(30),
                until: at,
            },
            samples_analyzed: 42,
            previous_health: None,
        }
    }

    fn event(category: AnomalyCategory) -> AnomalyEvent {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        AnomalyEvent {
            detected_at: at,
            source_sample_timestamp: at,
            category,
            anomaly_score: 0.9,
            raw_values: MetricSnapshot {
                memory_count: 1,
                api_response_time_ms: 1.0,
                cpu_percent: 1.0,
                memory_percent: 1.0,
                disk_percent: 1.0,
            },
        }
    }

    #[test]
    fn test_render_summarises_anomalies_and_skips() {
        let at = Utc.with_ymd_and_hms(2024, 2, 1, 6, 30, 0).unwrap();
        let report = ReportDocument::render(
            meta(at),
            Some(HealthScore {
                score: 0.9,
                contributing_factors: BTreeMap::new(),
                status: HealthStatus::Healthy,
            }),
            vec![],
            vec![
                event(AnomalyCategory::UsagePattern),
                event(AnomalyCategory::UsagePattern),
                event(AnomalyCategory::Performance),
            ],
            vec![],
            vec![
                StageReport::completed("anomalies", 3),
                StageReport::skipped("forecast:memory_count", "insufficient data", 0),
            ],
        );
        assert_eq!(report.anomaly_summary["usage_pattern"], 2);
        assert_eq!(report.anomaly_summary["performance"], 1);
        assert!(report.is_partial());
        assert_eq!(report.file_name(), "report_20240201T063000000Z.json");

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["stages"][1]["status"], "skipped");
        assert_eq!(json["stages"][1]["reason"], "insufficient data");
        assert!(json["stages"][0].get("reason").is_none());
    }

    #[test]
    fn test_write_report_updates_latest_pointer() {
        let dir = TempDir::new().unwrap();
        let writer = ReportWriter::new(dir.path().join("reports"));

        let first_at = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let first = ReportDocument::render(meta(first_at), None, vec![], vec![], vec![], vec![]);
        let first_path = writer.write_report(&first).unwrap();

        let second_at = Utc.with_ymd_and_hms(2024, 2, 2, 0, 0, 0).unwrap();
        let second = ReportDocument::render(meta(second_at), None, vec![], vec![], vec![], vec![]);
        writer.write_report(&second).unwrap();

        // Previous report stays on disk, pointer moves on
        assert!(first_path.exists());
        assert_eq!(writer.read_latest().unwrap(), Some(second));

        let leftovers: Vec<_> = std::fs::read_dir(writer.output_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_read_latest_without_reports() {
        let dir = TempDir::new().unwrap();
        let writer = ReportWriter::new(dir.path());
        assert!(writer.read_latest().unwrap().is_none());
    }
}
