use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use ::config::{Config as ConfigBuilder, ConfigError, Environment, File, FileFormat};

use super::{ActivityConfig, ClassifierConfig, HttpConfig, LoggingConfig, StatsConfig};

/// Main application configuration
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Counter persistence and update signalling
    #[serde(default)]
    pub stats: StatsConfig,

    /// Recent activity buffer
    #[serde(default)]
    pub activity: ActivityConfig,

    /// Host lists used to label recent activity
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// HTTP API configuration
    #[serde(default)]
    pub http: HttpConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Default configuration directory
    pub const CONFIG_DIR: &'static str = "config";

    /// Environment variable prefix
    const ENV_PREFIX: &'static str = "DNS_TELEMETRY";

    /// Build configuration using the following priority (highest to lowest):
    /// 1. Environment variables (DNS_TELEMETRY_<SECTION>__<KEY>)
    /// 2. Local configuration file (config/local.yaml)
    /// 3. Environment specific file (config/{env}.yaml)
    /// 4. Default configuration (config/default.yaml)
    /// 5. Built-in defaults
    pub fn new() -> Result<Self, ConfigError> {
        let environment = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let defaults = Config::default();

        let builder = ConfigBuilder::builder()
            // Stats configuration
            .set_default(
                "stats.update_channel_capacity",
                defaults.stats.update_channel_capacity as i64,
            )?
            // Activity configuration
            .set_default("activity.capacity", defaults.activity.capacity as i64)?
            .set_default(
                "activity.display_limit",
                defaults.activity.display_limit as i64,
            )?
            .set_default(
                "activity.queue_capacity",
                defaults.activity.queue_capacity as i64,
            )?
            .set_default(
                "activity.drain_timeout",
                format!("{}s", defaults.activity.drain_timeout.as_secs()),
            )?
            // HTTP configuration
            .set_default("http.enabled", defaults.http.enabled)?
            .set_default("http.bind_addr", defaults.http.bind_addr)?
            .set_default("http.bind_port", defaults.http.bind_port)?
            // Logging configuration
            .set_default("logging.trace_events", defaults.logging.trace_events)?
            .set_default("logging.level", defaults.logging.level)?
            .set_default("logging.format", defaults.logging.format)?
            .set_default(
                "logging.include_location",
                defaults.logging.include_location,
            )?;

        let config = builder
            .add_source(
                File::new(&format!("{}/default", Self::CONFIG_DIR), FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                File::new(
                    &format!("{}/{}", Self::CONFIG_DIR, environment),
                    FileFormat::Yaml,
                )
                .required(false),
            )
            .add_source(
                File::new(&format!("{}/local", Self::CONFIG_DIR), FileFormat::Yaml).required(false),
            )
            .add_source(Self::environment())
            .build()?;

        let config = config.try_deserialize()?;
        Self::validate(&config)?;

        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn from_file(path: PathBuf) -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from(path))
            .add_source(Self::environment())
            .build()?;

        let config = config.try_deserialize()?;
        Self::validate(&config)?;

        Ok(config)
    }

    fn environment() -> Environment {
        Environment::with_prefix(Self::ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    /// Validate configuration
    pub fn validate(config: &Self) -> Result<(), ConfigError> {
        fn validation_error(msg: &str) -> ConfigError {
            ConfigError::Message(msg.to_string())
        }

        if config.stats.update_channel_capacity == 0 {
            return Err(validation_error("Update channel capacity must be non-zero"));
        }

        if config.activity.capacity == 0 {
            return Err(validation_error("Activity capacity must be non-zero"));
        }
        if config.activity.display_limit == 0 {
            return Err(validation_error("Activity display limit must be non-zero"));
        }
        if config.activity.display_limit > config.activity.capacity {
            return Err(validation_error(
                "Activity display limit must not exceed activity capacity",
            ));
        }
        if config.activity.queue_capacity == 0 {
            return Err(validation_error("Activity queue capacity must be non-zero"));
        }

        if config.http.enabled {
            if config.http.bind_addr.is_empty() {
                return Err(validation_error("HTTP bind address must not be empty"));
            }
            if config.http.bind_port == 0 {
                return Err(validation_error("HTTP port must be non-zero"));
            }
        }

        config
            .logging
            .validate()
            .map_err(|e| ConfigError::Message(e.to_string()))?;

        Ok(())
    }
}
