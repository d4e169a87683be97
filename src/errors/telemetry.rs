use thiserror::Error;

use super::{ClassifyError, ConfigValidationError, InitializationError, IoOperation};

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Classifier error: {0}")]
    Classify(#[from] ClassifyError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigValidationError),

    #[error("Initialization error: {0}")]
    Init(#[from] InitializationError),

    #[error("I/O error during {operation}: {details}")]
    Io {
        operation: IoOperation,
        details: String,
        #[source]
        source: std::io::Error,
    },
}

impl TelemetryError {
    pub fn io(operation: IoOperation, details: impl Into<String>, source: std::io::Error) -> Self {
        TelemetryError::Io {
            operation,
            details: details.into(),
            source,
        }
    }
}

impl From<config::ConfigError> for TelemetryError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(ConfigValidationError::config(err.to_string()))
    }
}
