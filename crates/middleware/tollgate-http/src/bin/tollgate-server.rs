//! Tollgate server binary

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tollgate_http::{AppConfig, TollgateServer};
use tracing_subscriber::EnvFilter;

/// Rate limited HTTP server
#[derive(Debug, Parser)]
#[command(name = "tollgate-server", version, about)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "TOLLGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overriding the configuration
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Log as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }

    let server = TollgateServer::new(config).await?;
    server.start().await?;

    Ok(())
}
