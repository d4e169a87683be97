mod activity;
mod classifier;
mod http;
mod logging;
mod service;
mod stats;

pub use activity::Config as ActivityConfig;
pub use classifier::Config as ClassifierConfig;
pub use http::Config as HttpConfig;
pub use logging::Config as LoggingConfig;
pub use service::Config;
pub use stats::Config as StatsConfig;
