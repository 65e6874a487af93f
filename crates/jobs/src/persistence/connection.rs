//! Shared connection to the job store

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use super::memory::InMemoryJobStore;
use super::postgres::PostgresJobStore;
use super::store::{JobStore, StoreError};
use crate::reliability::{jittered, BackoffPolicy};

/// URL selecting the in-memory store
pub const MEMORY_STORE_URL: &str = "memory://";

/// Job store connection settings
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// `postgres://...` or `memory://`
    pub url: String,

    /// False when `url` is the built-in fallback rather than a configured value
    pub url_configured: bool,

    /// Pool size for PostgreSQL
    pub max_connections: u32,

    /// Connect attempts after the first one fails
    pub connect_retries: u32,

    /// Base delay of the reconnect backoff
    pub retry_base_delay: Duration,

    /// Pool acquire timeout
    pub acquire_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: MEMORY_STORE_URL.to_string(),
            url_configured: false,
            max_connections: 10,
            connect_retries: 5,
            retry_base_delay: Duration::from_millis(500),
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

impl StoreConfig {
    /// Load from environment
    ///
    /// `JOB_STORE_URL` wins over `DATABASE_URL`; with neither set the
    /// in-memory store is used.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let configured = lookup("JOB_STORE_URL").or_else(|| lookup("DATABASE_URL"));
        let url_configured = configured.is_some();
        let url = configured.unwrap_or(defaults.url);

        let max_connections = lookup("JOB_STORE_MAX_CONNECTIONS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_connections);

        let connect_retries = lookup("JOB_STORE_CONNECT_RETRIES")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.connect_retries);

        Self {
            url,
            url_configured,
            max_connections,
            connect_retries,
            ..defaults
        }
    }

    pub fn is_memory(&self) -> bool {
        self.url.starts_with(MEMORY_STORE_URL)
    }
}

/// Owns the one shared job store connection
///
/// Every queue, worker and query service reads through the handle returned by
/// [`ConnectionManager::store`]. Closing the manager closes the store, after
/// which every store call fails with [`StoreError::Connection`].
pub struct ConnectionManager {
    store: Arc<dyn JobStore>,
    closed: AtomicBool,
}

impl ConnectionManager {
    /// Connect to the configured store, retrying transient failures
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        if config.is_memory() {
            if config.url_configured {
                info!("Using in-memory job store");
            } else {
                warn!(
                    "Neither JOB_STORE_URL nor DATABASE_URL is set, falling back to the \
                     in-memory job store; jobs are lost on restart and not shared between processes"
                );
            }
            return Ok(Self::from_store(Arc::new(InMemoryJobStore::new())));
        }

        let backoff = BackoffPolicy::exponential(config.retry_base_delay);
        let mut attempt = 0;
        let pool = loop {
            attempt += 1;
            match PgPoolOptions::new()
                .max_connections(config.max_connections)
                .acquire_timeout(config.acquire_timeout)
                .connect(&config.url)
                .await
            {
                Ok(pool) => break pool,
                Err(e) if attempt <= config.connect_retries => {
                    let delay = jittered(backoff.delay_for(attempt), 0.2);
                    warn!(
                        attempt,
                        retries = config.connect_retries,
                        ?delay,
                        "Job store connection failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(StoreError::Connection(e.to_string())),
            }
        };

        PostgresJobStore::migrate(&pool).await?;
        info!(
            max_connections = config.max_connections,
            "Connected to PostgreSQL job store"
        );

        Ok(Self::from_store(Arc::new(PostgresJobStore::new(pool))))
    }

    /// Wrap an existing store
    pub fn from_store(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            closed: AtomicBool::new(false),
        }
    }

    /// Shared store handle
    pub fn store(&self) -> Arc<dyn JobStore> {
        Arc::clone(&self.store)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Check the store is reachable
    pub async fn health_check(&self) -> Result<(), StoreError> {
        if self.is_closed() {
            return Err(StoreError::Connection("connection closed".to_string()));
        }
        self.store.ping().await
    }

    /// Close the connection; later calls are no-ops
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.store.close().await;
        info!("Job store connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_memory() {
        let config = StoreConfig::default();
        assert!(config.is_memory());
        assert_eq!(config.max_connections, 10);
    }

    #[test]
    fn test_postgres_url_is_not_memory() {
        let config = StoreConfig {
            url: "postgres://localhost/cvforge".to_string(),
            ..StoreConfig::default()
        };
        assert!(!config.is_memory());
    }

    #[test]
    fn test_job_store_url_wins_over_database_url() {
        let config = StoreConfig::from_lookup(|key| match key {
            "JOB_STORE_URL" => Some("postgres://jobs/db".to_string()),
            "DATABASE_URL" => Some("postgres://app/db".to_string()),
            "JOB_STORE_MAX_CONNECTIONS" => Some("25".to_string()),
            "JOB_STORE_CONNECT_RETRIES" => Some("not-a-number".to_string()),
            _ => None,
        });
        assert_eq!(config.url, "postgres://jobs/db");
        assert_eq!(config.max_connections, 25);
        assert_eq!(config.connect_retries, 5);

        let config = StoreConfig::from_lookup(|key| {
            (key == "DATABASE_URL").then(|| "postgres://app/db".to_string())
        });
        assert_eq!(config.url, "postgres://app/db");
        assert!(config.url_configured);
    }

    #[test]
    fn test_memory_fallback_is_marked_unconfigured() {
        let config = StoreConfig::from_lookup(|_| None);
        assert!(config.is_memory());
        assert!(!config.url_configured);

        let config = StoreConfig::from_lookup(|key| {
            (key == "JOB_STORE_URL").then(|| MEMORY_STORE_URL.to_string())
        });
        assert!(config.is_memory());
        assert!(config.url_configured);
    }

    #[tokio::test]
    async fn test_memory_connect_and_close() {
        let manager = ConnectionManager::connect(&StoreConfig::default())
            .await
            .unwrap();
        assert!(manager.health_check().await.is_ok());

        manager.close().await;
        manager.close().await;

        assert!(manager.is_closed());
        assert!(matches!(
            manager.store().ping().await,
            Err(StoreError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_postgres_fails_after_retries() {
        let config = StoreConfig {
            url: "postgres://nobody@127.0.0.1:1/none".to_string(),
            connect_retries: 1,
            retry_base_delay: Duration::from_millis(10),
            acquire_timeout: Duration::from_millis(200),
            ..StoreConfig::default()
        };

        let result = ConnectionManager::connect(&config).await;
        assert!(matches!(result, Err(StoreError::Connection(_))));
    }
}
