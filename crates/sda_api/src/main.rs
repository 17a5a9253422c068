//! API worker: readiness/liveness endpoint and administrative queries
//! (spec.md §4.5, §6).
//!
//! Usage:
//!     sda-api --config config.yaml

mod server;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use sda_db::Db;
use sda_protocol::{config::SystemConfig, defaults};

use server::AppState;

#[derive(Parser, Debug)]
#[command(name = "sda-api", about = "SDA pipeline readiness and admin API")]
struct Args {
    /// Path to config.yaml
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Mirror file logs to stderr at the configured level instead of warn-only.
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    sda_logging::init_logging(sda_logging::LogConfig {
        app_name: "sda-api",
        verbose: args.verbose,
    })?;

    let config = SystemConfig::load(&args.config)?;

    let db = Db::connect((&config.db).into()).await?;
    let broker_addr = server::broker_addr_from_uri(&config.broker.uri);

    let addr: SocketAddr = config
        .ready_addr
        .clone()
        .unwrap_or_else(|| defaults::DEFAULT_READY_ADDR.to_string())
        .parse()?;

    let state = Arc::new(AppState { db, broker_addr });
    let shutdown = sda_logging::shutdown::install();

    tracing::info!("sda-api starting");
    server::serve(addr, state, shutdown).await
}
