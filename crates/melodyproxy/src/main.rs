//! melodyproxy - generation pass-through for MelodyCraft clients
//!
//! Subcommands:
//! - `melodyproxy serve` - run the HTTP proxy
//! - `melodyproxy config` - print the effective configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use melodyconf::MelodyConfig;
use std::path::PathBuf;
use std::time::Duration;

use melodyproxy::{serve, telemetry};

#[derive(Parser)]
#[command(name = "melodyproxy")]
#[command(about = "Generation pass-through for MelodyCraft")]
#[command(version)]
struct Cli {
    /// Config file (replaces ./melodycraft.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the proxy
    Serve {
        /// HTTP port to bind (overrides [proxy] http_port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Generation backend base URL (overrides [backend] base_url)
        #[arg(long)]
        backend: Option<String>,

        /// OTLP gRPC endpoint for OpenTelemetry (e.g., "localhost:4317")
        #[arg(long)]
        otlp_endpoint: Option<String>,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, sources) = MelodyConfig::load_with_sources_from(cli.config.as_deref())
        .context("loading configuration")?;

    match cli.command {
        Commands::Serve {
            port,
            backend,
            otlp_endpoint,
        } => {
            let otlp = otlp_endpoint.or(config.telemetry.otlp_endpoint.clone());
            telemetry::init(&config.telemetry.log_level, otlp.as_deref())?;
            for file in &sources.files {
                tracing::debug!(file = %file.display(), "config loaded");
            }

            serve::run(serve::ServeConfig {
                port: port.unwrap_or(config.proxy.http_port),
                backend: backend.unwrap_or(config.backend.base_url),
                timeout: Duration::from_millis(config.backend.timeout_ms),
            })
            .await?;
        }
        Commands::Config => {
            print!("{}", config.to_toml());
        }
    }

    Ok(())
}
