mod classify;
mod config;
mod init;
mod io_operation;
mod storage;
mod telemetry;

pub use classify::ClassifyError;
pub use config::ConfigValidationError;
pub use init::InitializationError;
pub use io_operation::IoOperation;
pub use storage::StorageError;
pub use telemetry::TelemetryError;
