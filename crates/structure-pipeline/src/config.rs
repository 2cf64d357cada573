//! Configuration for the structure pipeline

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Main pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineConfig {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Processing configuration
    #[serde(default)]
    pub processing: ProcessingConfig,
}

impl PipelineConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.processing.max_workers == Some(0) {
            return Err(Error::Config("processing.max_workers must be at least 1".to_string()));
        }
        if self.processing.startup_timeout_secs == 0 {
            return Err(Error::Config(
                "processing.startup_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.processing.shutdown_timeout_secs == 0 {
            return Err(Error::Config(
                "processing.shutdown_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path of the SQLite database file
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

fn default_database_path() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("data")
        .join("structures.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Processing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Number of concurrent worker slots (default: CPU count, max 8)
    #[serde(default)]
    pub max_workers: Option<usize>,
    /// How long startup may wait for the persistence writer (default: 60s)
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,
    /// How long shutdown waits for in-flight work (default: 30s)
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_startup_timeout() -> u64 { 60 }
fn default_shutdown_timeout() -> u64 { 30 }

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_workers: None, // Auto-detect from CPU count
            startup_timeout_secs: default_startup_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl ProcessingConfig {
    /// Effective worker pool size
    pub fn worker_count(&self) -> usize {
        self.max_workers
            .unwrap_or_else(|| num_cpus::get().min(8))
            .max(1)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.processing.startup_timeout_secs, 60);
        assert!(config.processing.worker_count() >= 1);
        assert!(config.processing.worker_count() <= 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_with_partial_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[database]
path = "/tmp/pipeline-test.db"

[processing]
max_workers = 3
"#
        )
        .unwrap();

        let config = PipelineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.database.path, PathBuf::from("/tmp/pipeline-test.db"));
        assert_eq!(config.processing.worker_count(), 3);
        assert_eq!(config.processing.shutdown_timeout_secs, 30);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[processing]\nmax_workers = 0").unwrap();

        let err = PipelineConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = PipelineConfig::from_file("/nonexistent/pipeline.toml").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
