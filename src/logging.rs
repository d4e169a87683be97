use time::UtcOffset;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::time::OffsetTime, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
    Registry,
};

use crate::{config::LoggingConfig, errors::InitializationError, TelemetryError};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber. Keep the returned guard alive for as long
/// as file logging should flush.
pub fn setup_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>, TelemetryError> {
    config.validate()?;

    let timer = OffsetTime::new(
        UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC),
        time::format_description::well_known::Rfc3339,
    );

    let env_filter = build_filter(config)?;

    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(config.thread_ids)
        .with_thread_names(config.thread_names)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_level(true)
        .with_timer(timer.clone());

    let mut layers: Vec<BoxedLayer> = Vec::new();
    if config.format == "json" {
        layers.push(console.json().boxed());
    } else {
        layers.push(console.boxed());
    }

    let guard = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "dns-telemetry.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            layers.push(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true)
                    .with_timer(timer)
                    .boxed(),
            );
            Some(guard)
        }
        None => None,
    };

    Registry::default()
        .with(layers)
        .with(env_filter)
        .try_init()
        .map_err(|e| {
            TelemetryError::Init(InitializationError::logging(format!(
                "Failed to initialize logging: {}",
                e
            )))
        })?;

    Ok(guard)
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, TelemetryError> {
    let mut env_filter = EnvFilter::default().add_directive(config.get_level_filter().into());

    if config.trace_events {
        let directive = "dns_telemetry::enricher=trace".parse().map_err(|e| {
            TelemetryError::Init(InitializationError::logging(format!(
                "Invalid trace directive: {}",
                e
            )))
        })?;
        env_filter = env_filter.add_directive(directive);
    }

    Ok(env_filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_includes_event_tracing() {
        let config = LoggingConfig {
            level: "warn".to_string(),
            trace_events: true,
            ..Default::default()
        };
        let filter = build_filter(&config).unwrap().to_string();
        assert!(filter.contains("dns_telemetry::enricher=trace"));
        assert!(filter.contains("warn"));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = LoggingConfig {
            format: "yaml".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            setup_logging(&config),
            Err(TelemetryError::Config(_))
        ));
    }
}
