//! Connection pool construction.
//!
//! Uses a concrete `PgPool` rather than `sqlx::AnyPool`: the state store is
//! Postgres-only (spec.md §6 — "Client authenticates with TLS client
//! certificate"), so there's no cross-backend abstraction to preserve.

use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::PgPool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::error::{DbError, Result};

/// Database connection settings. TLS material is referenced by path only.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub ca_cert: Option<std::path::PathBuf>,
    pub client_cert: Option<std::path::PathBuf>,
    pub client_key: Option<std::path::PathBuf>,
}

impl From<&sda_protocol::config::DbConfig> for DbConfig {
    fn from(config: &sda_protocol::config::DbConfig) -> Self {
        Self {
            url: config.url.clone(),
            max_connections: config.max_connections,
            ca_cert: config.ca_cert.clone(),
            client_cert: config.client_cert.clone(),
            client_key: config.client_key.clone(),
        }
    }
}

impl DbConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 10,
            ca_cert: None,
            client_cert: None,
            client_key: None,
        }
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_tls(
        mut self,
        ca_cert: Option<impl AsRef<Path>>,
        client_cert: Option<impl AsRef<Path>>,
        client_key: Option<impl AsRef<Path>>,
    ) -> Self {
        self.ca_cert = ca_cert.map(|p| p.as_ref().to_path_buf());
        self.client_cert = client_cert.map(|p| p.as_ref().to_path_buf());
        self.client_key = client_key.map(|p| p.as_ref().to_path_buf());
        self
    }
}

/// Create a pooled Postgres connection, applying TLS client-certificate
/// options when configured.
pub async fn create_pool(config: DbConfig) -> Result<PgPool> {
    let mut options = PgConnectOptions::from_str(&config.url).map_err(DbError::Sql)?;

    if let Some(ca) = &config.ca_cert {
        options = options.ssl_root_cert(ca).ssl_mode(PgSslMode::VerifyFull);
    }
    if let Some(cert) = &config.client_cert {
        options = options.ssl_client_cert(cert);
    }
    if let Some(key) = &config.client_key {
        options = options.ssl_client_key(key);
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await?;

    info!("connected to database");
    Ok(pool)
}

/// Liveness ping bounded by `timeout` (used by the readiness endpoint,
/// spec.md §6: DB ping must resolve within 5ms).
pub async fn ping(pool: &PgPool, timeout: Duration) -> bool {
    tokio::time::timeout(timeout, sqlx::query("SELECT 1").execute(pool))
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false)
}
