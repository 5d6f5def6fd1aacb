// Logger configuration
use serde::{Deserialize, Serialize};

use crate::redactor::RedactionConfig;

/// Output format of the log stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per event (production)
    Json,
    /// Human-readable lines (development)
    Pretty,
}

/// Rolling file output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogFileConfig {
    pub directory: String,
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Default filter directive when `RUST_LOG` is not set
    pub level: String,
    pub format: LogFormat,
    pub file: Option<LogFileConfig>,
    pub redaction: RedactionConfig,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
            file: None,
            redaction: RedactionConfig::default(),
        }
    }
}

impl LoggerConfig {
    /// Development preset: readable output, debug level
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            format: LogFormat::Pretty,
            ..Self::default()
        }
    }
}
