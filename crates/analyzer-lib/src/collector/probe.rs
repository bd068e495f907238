//! Memory API probe: item count and response latency in one request

use crate::error::{AnalysisError, Result};
use reqwest::Client;
use serde_json::Value;
use std::time::{Duration, Instant};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeResult {
    pub memory_count: u64,
    pub latency_ms: f64,
}

pub struct MemoryApiProbe {
    client: Client,
    url: Url,
}

impl MemoryApiProbe {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AnalysisError::Collector(format!("failed to create HTTP client: {}", e)))?;
        let url = Url::parse(url)
            .map_err(|e| AnalysisError::InvalidConfig(format!("invalid memory_api_url: {}", e)))?;
        Ok(Self { client, url })
    }

    /// GET the endpoint; latency covers the full response body
    pub async fn probe(&self) -> Result<ProbeResult> {
        let start = Instant::now();
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| AnalysisError::Collector(format!("memory API request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Collector(format!(
                "memory API error ({}): {}",
                status, body
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AnalysisError::Collector(format!("memory API response: {}", e)))?;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        let memory_count = count_memories(&body).ok_or_else(|| {
            AnalysisError::Collector("memory API response carries no count".into())
        })?;
        Ok(ProbeResult {
            memory_count,
            latency_ms,
        })
    }
}

/// Item count from a bare array, a `count`/`total` field, or a
/// `results`/`memories` array
pub fn count_memories(body: &Value) -> Option<u64> {
    if let Some(items) = body.as_array() {
        return Some(items.len() as u64);
    }
    let object = body.as_object()?;
    for key in ["count", "total"] {
        if let Some(n) = object.get(key).and_then(Value::as_u64) {
            return Some(n);
        }
    }
    ["results", "memories"]
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_array))
        .map(|items| items.len() as u64)
}
