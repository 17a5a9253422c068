//! Ingest worker: copies inbox objects into the archive and records them.
//!
//! Usage:
//!     sda-ingest --config config.yaml

mod handler;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use sda_broker::Broker;
use sda_db::Db;
use sda_protocol::config::SystemConfig;
use sda_security::UnimplementedCrypt4Gh;

use handler::Context;

#[derive(Parser, Debug)]
#[command(name = "sda-ingest", about = "SDA pipeline ingest worker")]
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
        app_name: "sda-ingest",
        verbose: args.verbose,
    })?;

    let config = SystemConfig::load(&args.config)?;

    let db = Db::connect((&config.db).into()).await?;
    let broker = Broker::connect(&config.broker.uri).await?;
    broker.set_prefetch(config.broker.prefetch_count).await?;

    let inbox = sda_storage::build_backend(&config.inbox).await?;
    let archive = sda_storage::build_backend(&config.archive).await?;

    let schemas = sda_protocol::SchemaRegistry::new(config.schema_dir.clone()).load(&[
        "ingestion-trigger.json",
        "ingestion-verification.json",
    ])?;

    let header_reader = Arc::new(UnimplementedCrypt4Gh);

    let shutdown = sda_logging::shutdown::install();

    let ctx = Context {
        db,
        broker,
        inbox: inbox.into(),
        archive: archive.into(),
        header_reader,
        schemas: Arc::new(schemas),
        durable: config.broker.durable,
        shutdown,
    };

    tracing::info!("sda-ingest starting");
    handler::run(ctx).await
}
