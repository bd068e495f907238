//! Anomaly detection over metric feature vectors
//!
//! This module provides:
//! - An isolation forest for unsupervised outlier scoring
//! - Threshold-based categorisation of flagged points

mod detector;
mod isolation_forest;

pub use detector::{AnomalyDetector, TrainedDetector, DETECTOR_FEATURES};
pub use isolation_forest::IsolationForest;
