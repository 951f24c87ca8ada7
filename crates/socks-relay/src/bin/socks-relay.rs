//! SOCKS5 relay server binary

use anyhow::{Context, Result};
use clap::Parser;
use socks_relay::{ProxyConfig, ProxyServer};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "socks-relay",
    about = "Minimal SOCKS5 relay with optional upstream chaining",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    /// Local address to listen on (e.g. [::1]:1081 for IPv6)
    #[arg(short, long)]
    listen: Option<String>,

    /// Upstream SOCKS5 proxy (e.g. 127.0.0.1:1081), leave empty for direct connections
    #[arg(short, long)]
    upstream: Option<String>,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Maximum concurrent sessions
    #[arg(long)]
    max_sessions: Option<usize>,

    /// Outbound connect timeout in seconds
    #[arg(long, value_name = "SECS")]
    connect_timeout: Option<u64>,

    /// Handshake timeout in seconds
    #[arg(long, value_name = "SECS")]
    handshake_timeout: Option<u64>,

    /// Relay idle timeout in seconds
    #[arg(long, value_name = "SECS")]
    idle_timeout: Option<u64>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    async fn into_config(self) -> Result<ProxyConfig> {
        let mut config = match &self.config {
            Some(path) => ProxyConfig::load_from_file(path)
                .await
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => ProxyConfig::default(),
        };

        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(upstream) = self.upstream {
            config.upstream = Some(upstream);
        }

        let limits = &mut config.limits;
        limits.max_sessions = self.max_sessions.or(limits.max_sessions);
        limits.connect_timeout_secs = self.connect_timeout.or(limits.connect_timeout_secs);
        limits.handshake_timeout_secs = self.handshake_timeout.or(limits.handshake_timeout_secs);
        limits.idle_timeout_secs = self.idle_timeout.or(limits.idle_timeout_secs);

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = cli.into_config().await?;
    let listen = config.listen.clone();

    let server = ProxyServer::bind(config)
        .await
        .with_context(|| format!("Failed to listen on {}", listen))?;

    server.serve().await?;
    Ok(())
}

fn setup_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if verbose { "socks_relay=debug" } else { "socks_relay=info" };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
