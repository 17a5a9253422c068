//! Layered configuration shared by every worker binary.
//!
//! Precedence, low to high: `config.yaml` on disk, then environment
//! variables prefixed per subsystem (`SDA_BROKER_*`, `SDA_DB_*`,
//! `SDA_STORAGE_*`). TLS material is referenced by path only; it is never
//! inlined into the config struct.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::defaults;

/// Broker connection settings. Transport security, when wanted, comes from
/// an `amqps://` URI — `lapin` picks TLS vs. plain TCP by scheme with the
/// system trust store. Unlike the database and S3 storage, spec.md names no
/// client-certificate requirement for the broker, so there's no cert/key
/// material to carry here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_uri")]
    pub uri: String,
    #[serde(default = "default_prefetch")]
    pub prefetch_count: u16,
    #[serde(default = "default_durable")]
    pub durable: bool,
}

fn default_broker_uri() -> String {
    defaults::DEFAULT_BROKER_URI.to_string()
}
fn default_prefetch() -> u16 {
    16
}
fn default_durable() -> bool {
    true
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            uri: default_broker_uri(),
            prefetch_count: default_prefetch(),
            durable: default_durable(),
        }
    }
}

/// Database connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    #[serde(default = "default_db_url")]
    pub url: String,
    #[serde(default)]
    pub ca_cert: Option<PathBuf>,
    #[serde(default)]
    pub client_cert: Option<PathBuf>,
    #[serde(default)]
    pub client_key: Option<PathBuf>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_url() -> String {
    defaults::DEFAULT_DB_URL.to_string()
}
fn default_max_connections() -> u32 {
    10
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: default_db_url(),
            ca_cert: None,
            client_cert: None,
            client_key: None,
            max_connections: default_max_connections(),
        }
    }
}

/// Object storage backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageConfig {
    Posix { root: PathBuf },
    S3 {
        bucket: String,
        endpoint: Option<String>,
        region: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        ca_bundle: Option<PathBuf>,
        path_style: bool,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Posix {
            root: PathBuf::from("./archive"),
        }
    }
}

/// Top-level config shared by all worker binaries. Each binary only reads
/// the sections it needs; fields it doesn't use are ignored.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SystemConfig {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default = "default_inbox")]
    pub inbox: StorageConfig,
    #[serde(default)]
    pub archive: StorageConfig,
    #[serde(default)]
    pub backup: Option<StorageConfig>,
    #[serde(default)]
    pub crypt4gh_private_key: Option<PathBuf>,
    #[serde(default = "default_schema_dir")]
    pub schema_dir: PathBuf,
    #[serde(default)]
    pub ready_addr: Option<String>,
}

fn default_inbox() -> StorageConfig {
    StorageConfig::Posix {
        root: PathBuf::from("./inbox"),
    }
}

fn default_schema_dir() -> PathBuf {
    PathBuf::from(defaults::DEFAULT_SCHEMA_DIR)
}

impl SystemConfig {
    /// Load `config.yaml` from `path`, then overlay `SDA_*` environment
    /// variables understood by [`apply_env_overrides`].
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config: SystemConfig = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            serde_yaml::from_str(&raw)?
        } else {
            SystemConfig::default()
        };
        apply_env_overrides(&mut config);
        Ok(config)
    }
}

/// Overlay environment variables onto a loaded config. Mirrors the
/// `CASPARIAN_HOME`-style override precedent: explicit env vars always win.
fn apply_env_overrides(config: &mut SystemConfig) {
    if let Ok(uri) = std::env::var("SDA_BROKER_URI") {
        config.broker.uri = uri;
    }
    if let Ok(url) = std::env::var("SDA_DB_URL") {
        config.db.url = url;
    }
    if let Ok(dir) = std::env::var("SDA_SCHEMA_DIR") {
        config.schema_dir = PathBuf::from(dir);
    }
    if let Ok(addr) = std::env::var("SDA_READY_ADDR") {
        config.ready_addr = Some(addr);
    }
}
