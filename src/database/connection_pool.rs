//! Async Postgres connection pooling with a background health-check task.
//!
//! Generalized from the donor's SQLite `ConnectionPool` (pool stats,
//! `HealthCheck` trait, periodic background probe) onto `sqlx::PgPool`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tokio::time::interval;

use super::{DatabaseError, Result};

/// Pool configuration, sourced from `DATABASE_URL` plus pool-sizing defaults.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub min_connections: u32,
    pub max_connections: u32,
    pub connect_timeout: u64,
    pub idle_timeout: u64,
    pub health_check_interval: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://postgres@127.0.0.1/notifyd".to_string(),
            min_connections: 2,
            max_connections: 20,
            connect_timeout: 10,
            idle_timeout: 600,
            health_check_interval: 60,
        }
    }
}

/// Rolling pool statistics, exported through [`ConnectionPool::stats`] and
/// consumed by the health aggregator (C8).
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub total_queries: u64,
    pub total_errors: u64,
    pub last_health_check: Option<Instant>,
    pub is_healthy: bool,
}

/// Connection pool with health monitoring, cheaply cloneable (the inner
/// `PgPool` is itself an `Arc`).
#[derive(Clone)]
pub struct ConnectionPool {
    pool: PgPool,
    config: DatabaseConfig,
    stats: Arc<RwLock<PoolStats>>,
}

impl ConnectionPool {
    /// Connects to `config.url`, failing fast if the database is
    /// unreachable at startup.
    pub async fn new(config: DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout)))
            .connect(&config.url)
            .await
            .map_err(|e| DatabaseError::ConnectionPool(e.to_string()))?;

        let instance = Self {
            pool,
            config: config.clone(),
            stats: Arc::new(RwLock::new(PoolStats {
                is_healthy: true,
                ..Default::default()
            })),
        };
        instance.start_health_check_task();
        Ok(instance)
    }

    /// Builds a pool that defers connecting until first query, for the
    /// `tests/` integration suite — those scenarios never issue a real
    /// query against `config.url`, so no network I/O happens. The
    /// background health-check task still starts; pair with a long
    /// `health_check_interval` so it never fires during a test.
    pub fn connect_lazy(config: DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout)))
            .connect_lazy(&config.url)
            .map_err(|e| DatabaseError::ConnectionPool(e.to_string()))?;

        let instance = Self {
            pool,
            config: config.clone(),
            stats: Arc::new(RwLock::new(PoolStats {
                is_healthy: true,
                ..Default::default()
            })),
        };
        instance.start_health_check_task();
        Ok(instance)
    }

    /// Reference to the underlying `sqlx` pool for repositories in
    /// [`crate::store`].
    pub fn inner(&self) -> &PgPool {
        &self.pool
    }

    /// Current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats.read().clone()
    }

    /// `SELECT 1` liveness probe, with latency, used by C8. Deliberately
    /// bypasses the circuit breaker (health probes must not open the
    /// breaker they are testing).
    pub async fn health_check(&self) -> Result<(bool, Duration)> {
        let start = Instant::now();
        let result = sqlx::query("SELECT 1").execute(&self.pool).await;
        let latency = start.elapsed();
        let healthy = result.is_ok();

        let mut stats = self.stats.write();
        stats.last_health_check = Some(Instant::now());
        stats.is_healthy = healthy;
        if healthy {
            stats.total_queries += 1;
        } else {
            stats.total_errors += 1;
        }

        Ok((healthy, latency))
    }

    fn start_health_check_task(&self) {
        let pool = self.clone();
        let every = Duration::from_secs(self.config.health_check_interval);
        tokio::spawn(async move {
            let mut ticker = interval(every);
            loop {
                ticker.tick().await;
                if let Err(e) = pool.health_check().await {
                    tracing::error!(error = %e, "database health check failed");
                }
            }
        });
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Generic named health-check surface, implemented by each collaborator
/// probe C8 composes (store, cache, broker).
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self) -> Result<bool>;
    fn name(&self) -> &str;
}

#[async_trait]
impl HealthCheck for ConnectionPool {
    async fn check(&self) -> Result<bool> {
        Ok(self.health_check().await?.0)
    }

    fn name(&self) -> &str {
        "database"
    }
}
