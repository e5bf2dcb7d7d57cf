//! Connection pool sizing and setup.
//!
//! Every in-flight ingestion file holds a connection for its document and
//! chunk writes, so the pool is sized from the batch file concurrency plus
//! a fixed reserve for API handlers (listing, search, job polling).

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, warn};

use lorekeep_core::{defaults, Error, Result};

/// Connections kept free for API requests while a batch is running.
pub const API_RESERVED_CONNECTIONS: u32 = 4;

const ACQUIRE_TIMEOUT_SECS: u64 = 30;
const IDLE_TIMEOUT_SECS: u64 = 600;

/// Pool limits for one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    /// How long a caller waits for a free connection.
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::for_file_concurrency(defaults::MAX_CONCURRENT_FILES)
    }
}

impl PoolConfig {
    /// Size the pool for `files` concurrently processed files.
    pub fn for_file_concurrency(files: usize) -> Self {
        let files = u32::try_from(files.max(1)).unwrap_or(u32::MAX);
        Self {
            max_connections: files.saturating_add(API_RESERVED_CONNECTIONS),
            min_connections: 1,
            acquire_timeout: Duration::from_secs(ACQUIRE_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(IDLE_TIMEOUT_SECS),
        }
    }

    /// Sized for `files` with overrides from `DATABASE_MAX_CONNECTIONS`,
    /// `DATABASE_MIN_CONNECTIONS`, `DATABASE_ACQUIRE_TIMEOUT_SECS` and
    /// `DATABASE_IDLE_TIMEOUT_SECS`.
    pub fn from_env(files: usize) -> Self {
        Self::from_lookup(files, |key| std::env::var(key).ok())
    }

    fn from_lookup(files: usize, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parse = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let mut config = Self::for_file_concurrency(files);

        if let Some(n) = parse("DATABASE_MAX_CONNECTIONS") {
            config.max_connections = u32::try_from(n).unwrap_or(u32::MAX).max(1);
        }
        if let Some(n) = parse("DATABASE_MIN_CONNECTIONS") {
            config.min_connections = u32::try_from(n).unwrap_or(u32::MAX);
        }
        config.min_connections = config.min_connections.min(config.max_connections);
        if let Some(secs) = parse("DATABASE_ACQUIRE_TIMEOUT_SECS") {
            config.acquire_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse("DATABASE_IDLE_TIMEOUT_SECS") {
            config.idle_timeout = Duration::from_secs(secs);
        }

        if (config.max_connections as usize) <= files {
            warn!(
                subsystem = "db",
                component = "pool",
                max_connections = config.max_connections,
                file_concurrency = files,
                "Pool is no larger than the file concurrency; API requests will queue behind ingestion"
            );
        }
        config
    }
}

/// Open a PostgreSQL pool with `config`.
pub async fn create_pool(database_url: &str, config: &PoolConfig) -> Result<PgPool> {
    let start = Instant::now();

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "db",
        component = "pool",
        op = "established",
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        duration_ms = start.elapsed().as_millis() as u64,
        "Database connection pool established"
    );
    Ok(pool)
}

/// Log pool usage; warns once every connection is checked out.
pub fn log_pool_metrics(pool: &PgPool) {
    let size = pool.size();
    let idle = pool.num_idle() as u32;
    let in_use = size.saturating_sub(idle);
    let max = pool.options().get_max_connections();

    debug!(
        subsystem = "db",
        component = "pool",
        op = "metrics",
        pool_size = size,
        in_use,
        max_connections = max,
        "Pool usage"
    );

    if in_use >= max {
        warn!(
            subsystem = "db",
            component = "pool",
            in_use,
            max_connections = max,
            "Connection pool exhausted"
        );
    }
}
