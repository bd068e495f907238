//! Sample ingestion commands

use analyzer_lib::{Analyzer, MetricSample};
use anyhow::{Context, Result};
use serde_json::json;
use std::path::Path;
use tabled::Tabled;

use crate::output::{print_json, print_success, print_table, OutputFormat};

#[derive(Tabled)]
struct SampleRow {
    #[tabled(rename = "Timestamp")]
    timestamp: String,
    #[tabled(rename = "Memories")]
    memory_count: u64,
    #[tabled(rename = "Latency ms")]
    latency: String,
    #[tabled(rename = "CPU")]
    cpu: String,
    #[tabled(rename = "Mem")]
    memory: String,
    #[tabled(rename = "Disk")]
    disk: String,
}

impl From<&MetricSample> for SampleRow {
    fn from(s: &MetricSample) -> Self {
        Self {
            timestamp: s.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            memory_count: s.memory_count,
            latency: format!("{:.1}", s.api_response_time_ms),
            cpu: format!("{:.1}%", s.cpu_percent),
            memory: format!("{:.1}%", s.memory_percent),
            disk: format!("{:.1}%", s.disk_percent),
        }
    }
}

/// Collect one live sample and append it to the store
pub async fn collect_metrics(analyzer: &Analyzer, format: OutputFormat) -> Result<()> {
    let sample = analyzer.collect().await?;

    match format {
        OutputFormat::Json => print_json(&sample),
        OutputFormat::Table => {
            print_table(&[SampleRow::from(&sample)], "No sample collected");
            print_success(&format!(
                "Sample stored in {}",
                analyzer.config().database_path.display()
            ));
            Ok(())
        }
    }
}

/// Append the samples of a JSON hand-off file
pub async fn import_samples(analyzer: &Analyzer, path: &Path, format: OutputFormat) -> Result<()> {
    let imported = analyzer
        .import(path)
        .await
        .with_context(|| format!("Failed to import {}", path.display()))?;

    match format {
        OutputFormat::Json => print_json(&json!({
            "imported": imported,
            "source": path,
        })),
        OutputFormat::Table => {
            print_success(&format!("Imported {} samples from {}", imported, path.display()));
            Ok(())
        }
    }
}
