//! Switchboard CLI entry point

mod cli;

use crate::cli::{Cli, Commands, LogFormat};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use switchboard::{RelayConfig, RelayServer};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Serve {
            bind,
            path,
            static_dir,
            outbound_buffer,
            send_timeout_ms,
            max_message_size,
        } => {
            serve(
                bind,
                path,
                static_dir,
                outbound_buffer,
                send_timeout_ms,
                max_message_size,
            )
            .await
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}

async fn serve(
    bind: String,
    path: String,
    static_dir: Option<PathBuf>,
    outbound_buffer: usize,
    send_timeout_ms: u64,
    max_message_size: usize,
) -> Result<()> {
    let bind_addr = bind.parse().context("Invalid bind address")?;

    let mut config = RelayConfig::new(bind_addr)
        .ws_path(path)
        .outbound_buffer(outbound_buffer)
        .send_timeout(Duration::from_millis(send_timeout_ms))
        .max_message_size(max_message_size);
    if let Some(dir) = static_dir {
        config = config.static_dir(dir);
    }
    config.validate().context("Invalid configuration")?;

    let server = RelayServer::new(config);

    info!("Starting switchboard relay...");
    server.run(shutdown_signal()).await?;

    info!("Switchboard relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping server");
}
