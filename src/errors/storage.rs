use std::path::PathBuf;

use thiserror::Error;

use super::IoOperation;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage I/O error during {operation} on {}: {source}", path.display())]
    Io {
        operation: IoOperation,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed stats file {}: {source}", path.display())]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid value for key {key}: {details}")]
    InvalidValue { key: String, details: String },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    pub fn io(operation: IoOperation, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub fn invalid_value(key: impl Into<String>, details: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            details: details.into(),
        }
    }

    pub fn unavailable(details: impl Into<String>) -> Self {
        Self::Unavailable(details.into())
    }
}
