//! Error taxonomy for the analysis engine

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the store, the analysis stages and the run orchestrator.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("invalid sample: {0}")]
    InvalidSample(String),

    #[error("insufficient data for {stage}: {available} points, need {required}")]
    InsufficientData {
        stage: String,
        available: usize,
        required: usize,
    },

    #[error("target metric {0} has no variance")]
    DegenerateTarget(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("run exceeded wall-clock budget of {0:?}")]
    Timeout(Duration),

    #[error("another analysis run holds the lock at {0}")]
    ConcurrentRun(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("collector error: {0}")]
    Collector(String),

    #[error("analysis task failed: {0}")]
    TaskFailed(String),
}

impl AnalysisError {
    pub fn insufficient(stage: impl Into<String>, available: usize, required: usize) -> Self {
        AnalysisError::InsufficientData {
            stage: stage.into(),
            available,
            required,
        }
    }

    /// Stage-level errors the orchestrator downgrades to a skipped stage.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AnalysisError::InsufficientData { .. } | AnalysisError::DegenerateTarget(_)
        )
    }

    /// Stable machine-readable kind, used in logs and error output.
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::InvalidSample(_) => "invalid_sample",
            AnalysisError::InsufficientData { .. } => "insufficient_data",
            AnalysisError::DegenerateTarget(_) => "degenerate_target",
            AnalysisError::Store(_) => "store",
            AnalysisError::Timeout(_) => "timeout",
            AnalysisError::ConcurrentRun(_) => "concurrent_run",
            AnalysisError::InvalidConfig(_) => "invalid_config",
            AnalysisError::Collector(_) => "collector",
            AnalysisError::TaskFailed(_) => "task_failed",
        }
    }

    /// Process exit code for this kind of failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            AnalysisError::InvalidSample(_) => 2,
            AnalysisError::InsufficientData { .. } => 3,
            AnalysisError::DegenerateTarget(_) => 4,
            AnalysisError::Store(_) => 5,
            AnalysisError::Timeout(_) => 6,
            AnalysisError::ConcurrentRun(_) => 7,
            AnalysisError::InvalidConfig(_) => 8,
            AnalysisError::Collector(_) => 9,
            AnalysisError::TaskFailed(_) => 10,
        }
    }
}

impl From<rusqlite::Error> for AnalysisError {
    fn from(e: rusqlite::Error) -> Self {
        AnalysisError::Store(e.to_string())
    }
}

impl From<std::io::Error> for AnalysisError {
    fn from(e: std::io::Error) -> Self {
        AnalysisError::Store(e.to_string())
    }
}

impl From<serde_json::Error> for AnalysisError {
    fn from(e: serde_json::Error) -> Self {
        AnalysisError::Store(format!("serialization: {}", e))
    }
}

pub type Result<T, E = AnalysisError> = std::result::Result<T, E>;
