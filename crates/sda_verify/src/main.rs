//! Verify worker: streams the archive object, re-checks its encrypted
//! checksum, decrypts it, and commits the plaintext checksums.
//!
//! Usage:
//!     sda-verify --config config.yaml

mod handler;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use sda_db::Db;
use sda_protocol::config::SystemConfig;
use sda_security::UnimplementedCrypt4Gh;

use handler::Context;

#[derive(Parser, Debug)]
#[command(name = "sda-verify", about = "SDA pipeline verify worker")]
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
        app_name: "sda-verify",
        verbose: args.verbose,
    })?;

    let config = SystemConfig::load(&args.config)?;

    let db = Db::connect((&config.db).into()).await?;
    let broker = sda_broker::Broker::connect(&config.broker.uri).await?;
    broker.set_prefetch(config.broker.prefetch_count).await?;

    let archive = sda_storage::build_backend(&config.archive).await?;

    let schemas = sda_protocol::SchemaRegistry::new(config.schema_dir.clone()).load(&[
        "ingestion-verification.json",
        "ingestion-accession-request.json",
    ])?;

    let private_key = match &config.crypt4gh_private_key {
        Some(path) => std::fs::read(path)?,
        None => Vec::new(),
    };

    let shutdown = sda_logging::shutdown::install();

    let ctx = Context {
        db,
        broker,
        archive: archive.into(),
        decryptor: Arc::new(UnimplementedCrypt4Gh),
        private_key,
        schemas: Arc::new(schemas),
        durable: config.broker.durable,
        shutdown,
    };

    tracing::info!("sda-verify starting");
    handler::run(ctx).await
}
