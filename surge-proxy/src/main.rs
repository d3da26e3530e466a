//! Surge Proxy - admission controller in front of a pool of backend servers.
//!
//! Requests are queued, optionally ranked by priority or grouped into
//! bundles, and dispatched to the least loaded backend that is below its
//! concurrency ceiling.
//!
//! ## Quick Start
//!
//! ```bash
//! # Reads ./config.json
//! surge-proxy
//!
//! # Explicit config file and port
//! surge-proxy /etc/surge/config.json --port 9000
//!
//! # Environment overrides
//! SURGE_MAX_REQUESTS_PER_SERVER=4 SURGE_RANDOMIZE_TIES=true surge-proxy
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use surge_proxy::{run_server, ProxyConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "surge-proxy")]
#[command(
    author,
    version,
    about = "Admission controller and load-aware dispatcher for backend pools",
    long_about = None
)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(default_value = "config.json")]
    config: PathBuf,

    /// Port to listen on (overrides the config file and SURGE_PORT)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("surge_proxy=info,surge_core=info,tower_http=info")
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    let cli = Cli::parse();

    let mut config = ProxyConfig::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?
        .with_env_overrides();
    if let Some(port) = cli.port {
        config.port = port;
    }
    config.validate().context("invalid configuration")?;

    run_server(config).await
}
