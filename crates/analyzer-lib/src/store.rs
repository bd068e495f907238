//! SQLite-backed metrics store
//!
//! Schema, one table per entity:
//! - metric_samples: append-only periodic samples
//! - forecast_results / anomaly_events / health_scores / recommendations:
//!   outputs of each analysis run, keyed by run_id
//!
//! Samples are never updated or deleted through this type.

use crate::error::{AnalysisError, Result};
use crate::models::{
    AnomalyEvent, ForecastResult, HealthScore, HealthStatus, MetricSample, MetricSnapshot,
    Recommendation,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS metric_samples (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp_ms INTEGER NOT NULL,
    memory_count INTEGER NOT NULL,
    api_response_time_ms REAL NOT NULL,
    cpu_percent REAL NOT NULL,
    memory_percent REAL NOT NULL,
    disk_percent REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_samples_timestamp ON metric_samples(timestamp_ms);

CREATE TABLE IF NOT EXISTS forecast_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    target_metric TEXT NOT NULL,
    horizon_days INTEGER NOT NULL,
    model_accuracy REAL NOT NULL,
    trend_direction TEXT NOT NULL,
    payload TEXT NOT NULL,
    generated_at_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS anomaly_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    detected_at_ms INTEGER NOT NULL,
    source_sample_ms INTEGER NOT NULL,
    category TEXT NOT NULL,
    anomaly_score REAL NOT NULL,
    raw_values TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_anomalies_run ON anomaly_events(run_id);

CREATE TABLE IF NOT EXISTS health_scores (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    recorded_at_ms INTEGER NOT NULL,
    score REAL NOT NULL,
    status TEXT NOT NULL,
    contributing_factors TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS recommendations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    rank INTEGER NOT NULL,
    category TEXT NOT NULL,
    priority TEXT NOT NULL,
    text TEXT NOT NULL,
    impact_score REAL NOT NULL,
    implementation_effort TEXT NOT NULL
);
"#;

/// Outputs of one analysis run, persisted together
#[derive(Debug, Clone, Copy)]
pub struct RunRecord<'a> {
    pub run_id: &'a str,
    pub recorded_at: DateTime<Utc>,
    pub forecasts: &'a [ForecastResult],
    pub anomalies: &'a [AnomalyEvent],
    pub health: Option<&'a HealthScore>,
    pub recommendations: &'a [Recommendation],
}

/// A previously recorded health score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub run_id: String,
    pub recorded_at: DateTime<Utc>,
    pub score: f64,
    pub status: HealthStatus,
}

/// Append-only metrics store plus run history
pub struct MetricsStore {
    conn: Connection,
}

impl MetricsStore {
    /// Open or create the store at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    /// In-memory store (tests and dry runs)
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Append one sample after validating its ranges
    pub fn append(&self, sample: &MetricSample) -> Result<()> {
        sample.validate()?;
        self.conn.execute(
            "INSERT INTO metric_samples
                (timestamp_ms, memory_count, api_response_time_ms, cpu_percent, memory_percent, disk_percent)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                sample.timestamp.timestamp_millis(),
                to_sql_count(sample.memory_count)?,
                sample.api_response_time_ms,
                sample.cpu_percent,
                sample.memory_percent,
                sample.disk_percent
            ],
        )?;
        Ok(())
    }

    /// Append samples in one transaction; nothing is written if any sample is invalid
    pub fn append_batch(&mut self, samples: &[MetricSample]) -> Result<usize> {
        for sample in samples {
            sample.validate()?;
        }
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO metric_samples
                    (timestamp_ms, memory_count, api_response_time_ms, cpu_percent, memory_percent, disk_percent)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for sample in samples {
                stmt.execute(params![
                    sample.timestamp.timestamp_millis(),
                    to_sql_count(sample.memory_count)?,
                    sample.api_response_time_ms,
                    sample.cpu_percent,
                    sample.memory_percent,
                    sample.disk_percent
                ])?;
            }
        }
        tx.commit()?;
        debug!(count = samples.len(), "Appended sample batch");
        Ok(samples.len())
    }

    /// Samples with `since <= timestamp <= until`, ascending; ties keep insertion order
    pub fn query(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> Result<Vec<MetricSample>> {
        let mut stmt = self.conn.prepare(
            "SELECT timestamp_ms, memory_count, api_response_time_ms, cpu_percent, memory_percent, disk_percent
             FROM metric_samples
             WHERE timestamp_ms >= ?1 AND timestamp_ms <= ?2
             ORDER BY timestamp_ms ASC, id ASC",
        )?;
        let rows = stmt.query_map(
            params![since.timestamp_millis(), until.timestamp_millis()],
            sample_from_row,
        )?;
        let mut samples = Vec::new();
        for row in rows {
            samples.push(row??);
        }
        Ok(samples)
    }

    /// Most recent sample, if any
    pub fn latest(&self) -> Result<Option<MetricSample>> {
        let sample = self
            .conn
            .query_row(
                "SELECT timestamp_ms, memory_count, api_response_time_ms, cpu_percent, memory_percent, disk_percent
                 FROM metric_samples ORDER BY timestamp_ms DESC, id DESC LIMIT 1",
                [],
                sample_from_row,
            )
            .optional()?;
        sample.transpose()
    }

    pub fn sample_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM metric_samples", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    /// Persist every output of a run atomically
    pub fn save_run(&mut self, record: &RunRecord<'_>) -> Result<()> {
        self.save_run_with(record, || Ok(()))
    }

    /// Persist a run, committing only once `finish` succeeds.
    ///
    /// The rows are inserted inside one transaction; an error from `finish`
    /// rolls them back so a failed run leaves nothing behind.
    pub fn save_run_with<T, F>(&mut self, record: &RunRecord<'_>, finish: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let tx = self.conn.transaction()?;
        let recorded_ms = record.recorded_at.timestamp_millis();

        for forecast in record.forecasts {
            tx.execute(
                "INSERT INTO forecast_results
                    (run_id, target_metric, horizon_days, model_accuracy, trend_direction, payload, generated_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.run_id,
                    forecast.target_metric.as_str(),
                    forecast.horizon_days as i64,
                    forecast.model_accuracy,
                    forecast.trend_direction.to_string(),
                    serde_json::to_string(forecast)?,
                    forecast.generated_at.timestamp_millis()
                ],
            )?;
        }

        for event in record.anomalies {
            tx.execute(
                "INSERT INTO anomaly_events
                    (run_id, detected_at_ms, source_sample_ms, category, anomaly_score, raw_values)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.run_id,
                    event.detected_at.timestamp_millis(),
                    event.source_sample_timestamp.timestamp_millis(),
                    event.category.as_str(),
                    event.anomaly_score,
                    serde_json::to_string(&event.raw_values)?
                ],
            )?;
        }

        if let Some(health) = record.health {
            tx.execute(
                "INSERT INTO health_scores (run_id, recorded_at_ms, score, status, contributing_factors)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.run_id,
                    recorded_ms,
                    health.score,
                    health.status.to_string(),
                    serde_json::to_string(&health.contributing_factors)?
                ],
            )?;
        }

        for (rank, rec) in record.recommendations.iter().enumerate() {
            tx.execute(
                "INSERT INTO recommendations
                    (run_id, rank, category, priority, text, impact_score, implementation_effort)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.run_id,
                    rank as i64,
                    rec.category,
                    rec.priority.to_string(),
                    rec.text,
                    rec.impact_score,
                    rec.implementation_effort.to_string()
                ],
            )?;
        }

        let finished = finish()?;
        tx.commit()?;
        debug!(
            run_id = %record.run_id,
            forecasts = record.forecasts.len(),
            anomalies = record.anomalies.len(),
            recommendations = record.recommendations.len(),
            "Run outputs persisted"
        );
        Ok(finished)
    }

    /// Most recent health scores, newest first
    pub fn health_history(&self, limit: usize) -> Result<Vec<HealthSnapshot>> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, recorded_at_ms, score, status FROM health_scores
             ORDER BY recorded_at_ms DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            let run_id: String = row.get(0)?;
            let recorded_ms: i64 = row.get(1)?;
            let score: f64 = row.get(2)?;
            let status: String = row.get(3)?;
            Ok((run_id, recorded_ms, score, status))
        })?;

        let mut history = Vec::new();
        for row in rows {
            let (run_id, recorded_ms, score, status) = row?;
            let status = match status.as_str() {
                "healthy" => HealthStatus::Healthy,
                "warning" => HealthStatus::Warning,
                "critical" => HealthStatus::Critical,
                other => {
                    return Err(AnalysisError::Store(format!("unknown health status '{}'", other)))
                }
            };
            history.push(HealthSnapshot {
                run_id,
                recorded_at: from_millis(recorded_ms)?,
                score,
                status,
            });
        }
        Ok(history)
    }

    /// Anomalies recorded by a run, in detection order
    pub fn anomalies_for_run(&self, run_id: &str) -> Result<Vec<AnomalyEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT detected_at_ms, source_sample_ms, category, anomaly_score, raw_values
             FROM anomaly_events WHERE run_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (detected_ms, source_ms, category, anomaly_score, raw) = row?;
            let raw_values: MetricSnapshot = serde_json::from_str(&raw)?;
            events.push(AnomalyEvent {
                detected_at: from_millis(detected_ms)?,
                source_sample_timestamp: from_millis(source_ms)?,
                category: category.parse()?,
                anomaly_score,
                raw_values,
            });
        }
        Ok(events)
    }

    /// Latest persisted forecast for a target
    pub fn latest_forecast(&self, target: &str) -> Result<Option<ForecastResult>> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload FROM forecast_results WHERE target_metric = ?1
                 ORDER BY generated_at_ms DESC, id DESC LIMIT 1",
                params![target],
                |row| row.get(0),
            )
            .optional()?;
        payload
            .map(|p| serde_json::from_str(&p).map_err(AnalysisError::from))
            .transpose()
    }
}

fn to_sql_count(count: u64) -> Result<i64> {
    i64::try_from(count)
        .map_err(|_| AnalysisError::InvalidSample(format!("memory_count {} out of range", count)))
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| AnalysisError::Store(format!("invalid timestamp {}", ms)))
}

fn sample_from_row(row: &Row<'_>) -> rusqlite::Result<Result<MetricSample>> {
    let timestamp_ms: i64 = row.get(0)?;
    let memory_count: i64 = row.get(1)?;
    let api_response_time_ms: f64 = row.get(2)?;
    let cpu_percent: f64 = row.get(3)?;
    let memory_percent: f64 = row.get(4)?;
    let disk_percent: f64 = row.get(5)?;

    Ok(from_millis(timestamp_ms).and_then(|timestamp| {
        MetricSample::new(
            timestamp,
            memory_count.max(0) as u64,
            api_response_time_ms,
            cpu_percent,
            memory_percent,
            disk_percent,
        )
    }))
}
