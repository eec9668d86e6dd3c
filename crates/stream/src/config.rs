use std::path::Path;

use lodstream_content::LoadExecution;
use serde::{Deserialize, Serialize};

/// Errors from reading or validating a [`StreamConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Streaming configuration: load admission and collapse hysteresis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Loads allowed in flight before the scheduler yields with WaitingOnLoad.
    pub max_concurrent_loads: usize,
    /// Seconds a node stays expanded after its target turns Collapsed.
    pub unload_delay: f64,
    /// Where loader work runs.
    pub load_execution: LoadExecution,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_concurrent_loads: 8,
            unload_delay: 2.0,
            load_execution: LoadExecution::ThreadPool,
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_loads == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_loads must be at least 1".into(),
            ));
        }
        if !self.unload_delay.is_finite() || self.unload_delay < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "unload_delay must be a finite, non-negative number of seconds (got {})",
                self.unload_delay
            )));
        }
        Ok(())
    }

    /// Save the configuration as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    /// Load and validate a configuration. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = std::fs::File::open(path)?;
        let config: Self = serde_json::from_reader(file)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn stream_config_defaults() {
        let config = StreamConfig::default();
        assert_eq!(config.max_concurrent_loads, 8);
        assert_eq!(config.unload_delay, 2.0);
        assert_eq!(config.load_execution, LoadExecution::ThreadPool);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn save_and_load() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let config = StreamConfig {
            max_concurrent_loads: 3,
            unload_delay: 0.5,
            load_execution: LoadExecution::Deferred,
        };
        config.save(tmp.path()).unwrap();
        assert_eq!(StreamConfig::load(tmp.path()).unwrap(), config);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(tmp, r#"{{ "unload_delay": 4.0 }}"#).unwrap();
        let config = StreamConfig::load(tmp.path()).unwrap();
        assert_eq!(config.unload_delay, 4.0);
        assert_eq!(config.max_concurrent_loads, 8);
    }

    #[test]
    fn execution_is_snake_case() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(tmp, r#"{{ "load_execution": "immediate" }}"#).unwrap();
        let config = StreamConfig::load(tmp.path()).unwrap();
        assert_eq!(config.load_execution, LoadExecution::Immediate);
    }

    #[test]
    fn zero_load_cap_is_rejected() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(tmp, r#"{{ "max_concurrent_loads": 0 }}"#).unwrap();
        let err = StreamConfig::load(tmp.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn negative_delay_is_rejected() {
        let config = StreamConfig {
            unload_delay: -1.0,
            ..StreamConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_json_is_a_json_error() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(tmp, "not json").unwrap();
        assert!(matches!(
            StreamConfig::load(tmp.path()),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            StreamConfig::load(dir.path().join("absent.json")),
            Err(ConfigError::Io(_))
        ));
    }
}
