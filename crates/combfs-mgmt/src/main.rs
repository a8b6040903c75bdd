use anyhow::Result;
use clap::Parser;
use combfs_mgmt::cli::{Cli, Command};
use combfs_mgmt::config::{LogFormat, MonitorConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Command::Serve { config } => {
            let found = config.exists();
            let settings = if found {
                MonitorConfig::from_file(config)?
            } else {
                MonitorConfig::default()
            };
            init_tracing(settings.log_format);
            if !found {
                tracing::warn!("Config file not found, using defaults: {}", config.display());
            }
            tracing::info!("combfs management monitor starting...");
            combfs_mgmt::server::run(settings).await
        }
        _ => {
            init_tracing(LogFormat::Text);
            cli.run().await
        }
    }
}
