//! PostgreSQL connection pool.

use std::time::Duration;

use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use tracing::{info, warn};

use super::dialect::PostgresDialect;
use crate::drivers::common::{make_tls_connect, parse_postgres_dsn, redact_dsn};
use crate::error::{MigrateError, Result};

/// PostgreSQL endpoint: a deadpool pool plus the dialect for its schema.
///
/// The same driver serves as source reader and target writer.
pub struct PostgresDriver {
    pub(super) pool: Pool,
    pub(super) dialect: PostgresDialect,
    pub(super) endpoint: String,
}

impl PostgresDriver {
    /// Connect to the database named by `dsn` and verify the connection.
    ///
    /// A malformed DSN is a configuration error; anything that prevents the
    /// first query from succeeding is a connectivity error.
    pub async fn connect(dsn: &str, max_conns: usize) -> Result<Self> {
        let endpoint = redact_dsn(dsn);
        let parsed = parse_postgres_dsn(dsn)?;

        let mut pg_config = parsed.config;
        if pg_config.get_connect_timeout().is_none() {
            pg_config.connect_timeout(Duration::from_secs(30));
        }
        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(60));

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let pool = match make_tls_connect(parsed.ssl_mode)? {
            Some(tls) => {
                let mgr = Manager::from_config(pg_config, tls, mgr_config);
                Pool::builder(mgr)
                    .max_size(max_conns.max(1))
                    .build()
                    .map_err(|e| MigrateError::pool(e, "creating PostgreSQL pool"))?
            }
            None => {
                if !is_local_host(&pg_config) {
                    warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                }
                let mgr = Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config);
                Pool::builder(mgr)
                    .max_size(max_conns.max(1))
                    .build()
                    .map_err(|e| MigrateError::pool(e, "creating PostgreSQL pool"))?
            }
        };

        let driver = Self {
            pool,
            dialect: PostgresDialect::new(parsed.schema),
            endpoint,
        };

        // Test connection
        let client = driver
            .pool
            .get()
            .await
            .map_err(|e| MigrateError::connectivity(&driver.endpoint, e))?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| MigrateError::connectivity(&driver.endpoint, e))?;

        info!("Connected to PostgreSQL: {}", driver.endpoint);
        Ok(driver)
    }

    pub fn dialect(&self) -> &PostgresDialect {
        &self.dialect
    }

    /// Redacted DSN, for logs and error messages.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub(super) async fn client(&self, context: &str) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, context))
    }
}

fn is_local_host(config: &tokio_postgres::Config) -> bool {
    config.get_hosts().iter().all(|host| match host {
        tokio_postgres::config::Host::Tcp(name) => {
            name == "localhost" || name == "127.0.0.1" || name == "::1"
        }
        #[cfg(unix)]
        tokio_postgres::config::Host::Unix(_) => true,
    })
}
