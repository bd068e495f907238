//! Metric sample collection
//!
//! Samples reach the store two ways: a live reading of the host plus the
//! memory API, or a JSON hand-off file produced by an external collector.
//! Both go through [`MetricSample`] validation before they are appended.

mod host;
mod probe;

pub use host::{cpu_percent, disk_percent, parse_cpu_times, parse_meminfo, CpuTimes, HostCollector};
pub use probe::{count_memories, MemoryApiProbe, ProbeResult};

use crate::error::{AnalysisError, Result};
use crate::models::MetricSample;
use std::path::Path;

pub use async_trait::async_trait;

/// Source of one fresh sample per call
#[async_trait]
pub trait SampleCollector: Send + Sync {
    async fn collect(&self) -> Result<MetricSample>;
}

/// Read a JSON array of samples, validating each one.
///
/// A single invalid sample rejects the whole file.
pub fn load_samples(path: &Path) -> Result<Vec<MetricSample>> {
    let bytes = std::fs::read(path)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AnalysisError::InvalidSample(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_samples() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("samples.json");
        std::fs::write(
            &path,
            r#"[
                {"timestamp": "2024-05-01T00:00:00Z", "memory_count": 10, "api_response_time_ms": 12.5,
                 "cpu_percent": 20.0, "memory_percent": 30.0, "disk_percent": 40.0},
                {"timestamp": "2024-05-02T00:00:00Z", "memory_count": 12, "api_response_time_ms": 13.0,
                 "cpu_percent": 21.0, "memory_percent": 31.0, "disk_percent": 40.5}
            ]"#,
        )
        .unwrap();

        let samples = load_samples(&path).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].memory_count, 12);
    }

    #[test]
    fn test_load_samples_rejects_out_of_range() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(
            &path,
            r#"[{"timestamp": "2024-05-01T00:00:00Z", "memory_count": 10, "api_response_time_ms": 1.0,
                 "cpu_percent": 120.0, "memory_percent": 30.0, "disk_percent": 40.0}]"#,
        )
        .unwrap();

        let err = load_samples(&path).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidSample(_)));
        assert!(err.to_string().contains("cpu_percent"));
    }

    #[test]
    fn test_load_samples_missing_file() {
        let err = load_samples(Path::new("/nonexistent/samples.json")).unwrap_err();
        assert!(matches!(err, AnalysisError::Store(_)));
    }
}
