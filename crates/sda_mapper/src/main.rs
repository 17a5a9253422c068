//! Mapper worker: associates accession ids with a dataset id.
//!
//! Usage:
//!     sda-mapper --config config.yaml

mod handler;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use sda_db::Db;
use sda_protocol::config::SystemConfig;

use handler::Context;

#[derive(Parser, Debug)]
#[command(name = "sda-mapper", about = "SDA pipeline dataset mapper worker")]
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
        app_name: "sda-mapper",
        verbose: args.verbose,
    })?;

    let config = SystemConfig::load(&args.config)?;

    let db = Db::connect((&config.db).into()).await?;
    let broker = sda_broker::Broker::connect(&config.broker.uri).await?;
    broker.set_prefetch(config.broker.prefetch_count).await?;

    let schemas = sda_protocol::SchemaRegistry::new(config.schema_dir.clone())
        .load(&["dataset-mapping.json"])?;

    let shutdown = sda_logging::shutdown::install();

    let ctx = Context {
        db,
        broker,
        schemas: Arc::new(schemas),
        durable: config.broker.durable,
        shutdown,
    };

    tracing::info!("sda-mapper starting");
    handler::run(ctx).await
}
