use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("Host list unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid host name: {0:?}")]
    InvalidHost(String),

    #[error("Failed to load host list {}: {source}", path.display())]
    ListLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ClassifyError {
    pub fn unavailable(details: impl Into<String>) -> Self {
        Self::Unavailable(details.into())
    }
}
