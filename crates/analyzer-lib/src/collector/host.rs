//! Host utilisation from procfs and statvfs

use super::probe::MemoryApiProbe;
use super::SampleCollector;
use crate::config::CollectorConfig;
use crate::error::{AnalysisError, Result};
use crate::models::MetricSample;
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::debug;

/// Aggregate jiffies from the `cpu` line of `/proc/stat`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub idle: u64,
    pub total: u64,
}

/// Parse the aggregate `cpu` line; idle includes iowait
pub fn parse_cpu_times(content: &str) -> Option<CpuTimes> {
    let line = content.lines().find(|l| l.starts_with("cpu "))?;
    let values: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|v| v.parse().ok())
        .collect();
    if values.len() < 4 {
        return None;
    }
    let idle = values[3] + values.get(4).copied().unwrap_or(0);
    Some(CpuTimes {
        idle,
        total: values.iter().sum(),
    })
}

/// Busy share between two readings, in percent
pub fn cpu_percent(before: CpuTimes, after: CpuTimes) -> f64 {
    let total = after.total.saturating_sub(before.total);
    if total == 0 {
        return 0.0;
    }
    let idle = after.idle.saturating_sub(before.idle);
    ((1.0 - idle as f64 / total as f64) * 100.0).clamp(0.0, 100.0)
}

/// Used memory percent from `/proc/meminfo` (MemTotal - MemAvailable)
pub fn parse_meminfo(content: &str) -> Option<f64> {
    let field = |name: &str| -> Option<u64> {
        content
            .lines()
            .find(|l| l.starts_with(name))?
            .split_whitespace()
            .nth(1)?
            .parse()
            .ok()
    };
    let total = field("MemTotal:")?;
    let available = field("MemAvailable:")?;
    if total == 0 {
        return None;
    }
    let used = total.saturating_sub(available);
    Some((used as f64 / total as f64 * 100.0).clamp(0.0, 100.0))
}

/// Used share of the filesystem at `path`, computed like `df`
pub fn disk_percent(path: &Path) -> Result<f64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| AnalysisError::Collector(format!("invalid disk path: {}", e)))?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(AnalysisError::Collector(format!(
            "statvfs {}: {}",
            path.display(),
            std::io::Error::last_os_error()
        )));
    }

    let used = stat.f_blocks.saturating_sub(stat.f_bfree) as f64;
    let available = stat.f_bavail as f64;
    if used + available <= 0.0 {
        return Ok(0.0);
    }
    Ok((used / (used + available) * 100.0).clamp(0.0, 100.0))
}

/// Samples the local host and, when configured, the memory API
pub struct HostCollector {
    proc_path: PathBuf,
    disk_path: PathBuf,
    cpu_interval: Duration,
    probe: Option<MemoryApiProbe>,
    fallback_count: u64,
}

impl HostCollector {
    pub fn new(config: &CollectorConfig) -> Result<Self> {
        let probe = match &config.memory_api_url {
            Some(url) => Some(MemoryApiProbe::new(
                url,
                Duration::from_secs(config.probe_timeout_secs),
            )?),
            None => None,
        };
        Ok(Self {
            proc_path: config.proc_path.clone(),
            disk_path: config.disk_path.clone(),
            cpu_interval: Duration::from_millis(config.cpu_sample_ms),
            probe,
            fallback_count: 0,
        })
    }

    /// Memory count reported when no API endpoint is configured
    pub fn with_fallback_count(mut self, count: u64) -> Self {
        self.fallback_count = count;
        self
    }

    async fn read_proc(&self, name: &str) -> Result<String> {
        let path = self.proc_path.join(name);
        fs::read_to_string(&path)
            .await
            .map_err(|e| AnalysisError::Collector(format!("read {}: {}", path.display(), e)))
    }

    async fn read_cpu_times(&self) -> Result<CpuTimes> {
        let content = self.read_proc("stat").await?;
        parse_cpu_times(&content)
            .ok_or_else(|| AnalysisError::Collector("no aggregate cpu line in stat".into()))
    }
}

#[async_trait]
impl SampleCollector for HostCollector {
    async fn collect(&self) -> Result<MetricSample> {
        let before = self.read_cpu_times().await?;
        tokio::time::sleep(self.cpu_interval).await;
        let after = self.read_cpu_times().await?;
        let cpu = cpu_percent(before, after);

        let meminfo = self.read_proc("meminfo").await?;
        let memory = parse_meminfo(&meminfo)
            .ok_or_else(|| AnalysisError::Collector("meminfo lacks MemTotal/MemAvailable".into()))?;

        let disk = disk_percent(&self.disk_path)?;

        let (memory_count, latency_ms) = match &self.probe {
            Some(probe) => {
                let result = probe.probe().await?;
                (result.memory_count, result.latency_ms)
            }
            None => (self.fallback_count, 0.0),
        };

        debug!(cpu, memory, disk, memory_count, latency_ms, "Host sample collected");
        MetricSample::new(Utc::now(), memory_count, latency_ms, cpu, memory, disk)
    }
}
