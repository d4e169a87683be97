pub mod activity;
pub mod classifier;
pub mod config;
pub mod counters;
pub mod display;
pub mod enricher;
pub mod errors;
pub mod http_api;
pub mod logging;
pub mod publisher;
pub mod service;
pub mod statistics;
pub mod storage;

pub use activity::{ListType, LogEntry, LogFilter, RecentActivity};
pub use classifier::{HostClassifier, HostListClassifier};
pub use crate::config::Config;
pub use counters::{CounterSet, Counters, Outcome};
pub use enricher::ActivityLogger;
pub use errors::TelemetryError;
pub use publisher::StatisticsUpdated;
pub use service::TelemetryService;
pub use statistics::Statistics;
pub use storage::{JsonFileStore, MemoryStore, StatsStore};
