//! Engine configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::EngineError;

/// Tuning knobs for the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Mirror handler log entries as `tracing` events.
    pub echo_logs: bool,
    /// Maximum number of activations that may wait for a client event at once.
    pub max_pending_resumes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            echo_logs: true,
            max_pending_resumes: 1024,
        }
    }
}

impl EngineConfig {
    /// Load a JSON configuration file; missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, EngineError> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| EngineError::Config(format!("invalid JSON: {e}")))?;
        if config.max_pending_resumes == 0 {
            return Err(EngineError::Config("max_pending_resumes must be at least 1".into()));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_fills_defaults() {
        let config = EngineConfig::from_json_str(r#"{ "echo_logs": false }"#).unwrap();
        assert!(!config.echo_logs);
        assert_eq!(config.max_pending_resumes, 1024);
    }

    #[test]
    fn zero_pending_resumes_is_rejected() {
        assert!(matches!(
            EngineConfig::from_json_str(r#"{ "max_pending_resumes": 0 }"#),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        assert!(matches!(
            EngineConfig::from_json_file("/definitely/not/here.json"),
            Err(EngineError::Config(_))
        ));
    }
}
