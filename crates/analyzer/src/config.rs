//! Configuration loading for the CLI
//!
//! Sources, later ones winning:
//! 1. `--config <path>` (required to exist) or `~/.config/growth-analyzer/config.json` (optional)
//! 2. `GROWTH_ANALYZER__*` environment variables, `__` separating nested keys

use analyzer_lib::{AnalysisConfig, AnalysisError};
use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "GROWTH_ANALYZER";

/// Default config file location
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::home_dir().map(|home| {
        home.join(".config")
            .join("growth-analyzer")
            .join("config.json")
    })
}

/// Load and merge every configuration source
pub fn load(override_path: Option<&Path>) -> Result<AnalysisConfig> {
    let mut builder = Config::builder();

    match override_path {
        Some(path) => {
            builder = builder.add_source(File::from(path).format(FileFormat::Json));
        }
        None => {
            if let Some(path) = default_config_path() {
                builder = builder.add_source(
                    File::from(path)
                        .format(FileFormat::Json)
                        .required(false),
                );
            }
        }
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("forecast.targets"),
    );

    let merged = builder
        .build()
        .map_err(|e| AnalysisError::InvalidConfig(e.to_string()))
        .context("Failed to read configuration")?;
    merged
        .try_deserialize()
        .map_err(|e| AnalysisError::InvalidConfig(e.to_string()))
        .context("Failed to parse configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "analysis_period_days": 14,
                "thresholds": {"cpu_percent": 70.0},
                "forecast": {"targets": ["memory_count", "disk_percent"]},
                "output_dir": "/tmp/growth-reports"
            }"#,
        )
        .unwrap();

        let config = load(Some(&path)).unwrap();
        assert_eq!(config.analysis_period_days, 14);
        assert_eq!(config.thresholds.cpu_percent, 70.0);
        // Unset keys keep their defaults
        assert_eq!(config.thresholds.disk_percent, 90.0);
        assert_eq!(config.forecast.targets.len(), 2);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/growth-reports"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        assert!(load(Some(Path::new("/nonexistent/growth.json"))).is_err());
    }

    #[test]
    fn test_malformed_file_is_invalid_config() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, r#"{"analysis_period_days": "soon""#).unwrap();

        let err = load(Some(&path)).unwrap_err();
        let analysis_error = err.downcast_ref::<AnalysisError>().unwrap();
        assert_eq!(analysis_error.exit_code(), 8);

        std::fs::write(&path, r#"{"analysis_period_days": "soon"}"#).unwrap();
        let err = load(Some(&path)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AnalysisError>(),
            Some(AnalysisError::InvalidConfig(_))
        ));
    }
}
