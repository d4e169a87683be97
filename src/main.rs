use clap::{Args, Parser};
use std::{path::PathBuf, sync::Arc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use dns_telemetry::{logging, Config, Outcome, TelemetryService};

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args)]
struct CommonArgs {
    /// Path to the config file
    #[arg(short, long, default_value = "/etc/dns-telemetry/config.yaml")]
    config: PathBuf,

    /// Dump default config and exit
    #[arg(long = "dump-default-config")]
    dump_default: bool,

    /// Read "<blocked|allowed|redirected> <host>" events from stdin
    #[arg(long)]
    stdin: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.common.dump_default {
        let config = Config::default();
        println!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    let config_exists = cli.common.config.exists();
    let config = if config_exists {
        Config::from_file(cli.common.config.clone())?
    } else {
        Config::new()?
    };

    let _log_guard = logging::setup_logging(&config.logging)?;

    if config_exists {
        info!("Loaded config from {}", cli.common.config.display());
    } else {
        info!("Config file not found, using layered defaults");
        info!(
            "Consider running with --dump-default-config > {}",
            cli.common.config.display()
        );
    }

    let service = Arc::new(TelemetryService::new(config)?);
    let runner = tokio::spawn(Arc::clone(&service).run());

    if cli.common.stdin {
        let feeder = Arc::clone(&service);
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        // recording writes through to storage
                        let feeder = Arc::clone(&feeder);
                        if let Err(e) =
                            tokio::task::spawn_blocking(move || feed_line(&feeder, &line)).await
                        {
                            warn!("Event task failed: {}", e);
                        }
                    }
                    Ok(None) => {
                        info!("Event input closed");
                        break;
                    }
                    Err(e) => {
                        warn!("Failed to read event input: {}", e);
                        break;
                    }
                }
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("Received interrupt");

    service.shutdown().await;
    runner.await??;

    Ok(())
}

fn feed_line(service: &TelemetryService, line: &str) {
    let mut fields = line.split_whitespace();
    let (Some(outcome), Some(host)) = (fields.next(), fields.next()) else {
        return;
    };

    match outcome.parse::<Outcome>() {
        Ok(outcome) => {
            service.record(host, outcome);
        }
        Err(e) => warn!("Skipping event {:?}: {}", line, e),
    }
}
