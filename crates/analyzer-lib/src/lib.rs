//! Growth pattern analysis library
//!
//! This crate provides the core functionality for:
//! - An append-only metrics store
//! - Feature engineering and ensemble trend forecasting
//! - Isolation-forest anomaly detection
//! - Health scoring and ranked recommendations
//! - JSON reports, SVG charts and run observability

pub mod anomaly;
pub mod collector;
pub mod config;
pub mod error;
pub mod health;
pub mod lock;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod predictor;
pub mod recommend;
pub mod report;
pub mod store;

pub use config::AnalysisConfig;
pub use error::{AnalysisError, Result};
pub use health::HealthScorer;
pub use models::*;
pub use observability::{AnalyzerMetrics, StructuredLogger};
pub use pipeline::{Analyzer, RunMode, RunOutcome};
pub use recommend::RecommendationGenerator;
pub use report::{ReportDocument, ReportWriter};
pub use store::MetricsStore;
