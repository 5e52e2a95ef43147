//! pulsed — the Pulse daemon.
//!
//! Reports a node's liveness and readiness over HTTP and, optionally,
//! through file or TCP transports for orchestrators that probe those.
//!
//! # Usage
//!
//! ```text
//! pulsed run --config /etc/pulse/pulse.toml
//! pulsed config --config /etc/pulse/pulse.toml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pulsed::{Daemon, PulseConfig};

#[derive(Parser)]
#[command(name = "pulsed", about = "Pulse health signal daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon.
    Run {
        /// Path to pulse.toml. Defaults apply if the file is absent.
        #[arg(long, default_value = "pulse.toml")]
        config: PathBuf,

        /// Override the HTTP port from the config file.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the effective configuration.
    Config {
        #[arg(long, default_value = "pulse.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run { config, port } => {
            let mut config = PulseConfig::load_or_default(&config)?;
            if let Some(port) = port {
                config.http.port = port;
            }
            run(config).await
        }
        Command::Config { config } => {
            let config = PulseConfig::load_or_default(&config)?;
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,pulse=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(config: PulseConfig) -> anyhow::Result<()> {
    info!(node = %config.node.id, "Pulse daemon starting");

    let daemon = Daemon::start(&config)?;
    let shutdown = daemon.shutdown_token();

    let addr: SocketAddr = format!("{}:{}", config.http.host, config.http.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "health endpoints listening");

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, daemon.router())
        .with_graceful_shutdown(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("shutdown signal received"),
                Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
            }
            shutdown.cancel();
        })
        .await?;

    daemon.shutdown().await;
    info!("Pulse daemon stopped");
    Ok(())
}
