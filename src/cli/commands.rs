//! CLI command definitions

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(about = "WebSocket signaling relay", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, env = "SWITCHBOARD_LOG_FORMAT", global = true)]
    pub log_format: LogFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the relay server
    ///
    /// Examples:
    ///   switchboard serve
    ///   switchboard serve --bind 127.0.0.1:9000 --static-dir ./static
    Serve {
        /// Address to bind to
        #[arg(short, long, default_value = switchboard::config::DEFAULT_BIND_ADDR, env = "SWITCHBOARD_BIND")]
        bind: String,

        /// Path of the WebSocket endpoint
        #[arg(long, default_value = switchboard::config::DEFAULT_WS_PATH, env = "SWITCHBOARD_PATH")]
        path: String,

        /// Directory holding index.html and client assets
        #[arg(long, env = "SWITCHBOARD_STATIC_DIR")]
        static_dir: Option<PathBuf>,

        /// Frames queued per connection before sends wait
        #[arg(long, default_value_t = 64, env = "SWITCHBOARD_OUTBOUND_BUFFER")]
        outbound_buffer: usize,

        /// Milliseconds a send may wait on a full queue before the peer is dropped
        #[arg(long, default_value_t = 5000, env = "SWITCHBOARD_SEND_TIMEOUT_MS")]
        send_timeout_ms: u64,

        /// Largest inbound message, in bytes
        #[arg(long, default_value_t = 1024 * 1024, env = "SWITCHBOARD_MAX_MESSAGE_SIZE")]
        max_message_size: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_serve_defaults() {
        let cli = Cli::try_parse_from(["switchboard", "serve"]).unwrap();
        assert_eq!(cli.log_format, LogFormat::Pretty);
        let Commands::Serve {
            bind,
            path,
            static_dir,
            outbound_buffer,
            send_timeout_ms,
            max_message_size,
        } = cli.command;
        assert_eq!(bind, "0.0.0.0:8000");
        assert_eq!(path, "/ws");
        assert!(static_dir.is_none());
        assert_eq!(outbound_buffer, 64);
        assert_eq!(send_timeout_ms, 5000);
        assert_eq!(max_message_size, 1024 * 1024);
    }

    #[test]
    fn test_serve_overrides() {
        let cli = Cli::try_parse_from([
            "switchboard",
            "--log-format",
            "json",
            "serve",
            "--bind",
            "127.0.0.1:9000",
            "--static-dir",
            "./static",
            "--send-timeout-ms",
            "250",
        ])
        .unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        let Commands::Serve {
            bind,
            static_dir,
            send_timeout_ms,
            ..
        } = cli.command;
        assert_eq!(bind, "127.0.0.1:9000");
        assert_eq!(static_dir, Some(PathBuf::from("./static")));
        assert_eq!(send_timeout_ms, 250);
    }
}
