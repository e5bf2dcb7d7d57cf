//! Server configuration from the environment.

use axum::http::HeaderValue;

use lorekeep_core::defaults;

/// Settings for the HTTP server itself. Pipeline tunables live in
/// [`lorekeep_jobs::IngestConfig`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Files accepted by one `upload-batch` request.
    pub max_batch_files: usize,
    /// Request body limit in bytes.
    pub max_upload_bytes: usize,
    pub event_bus_capacity: usize,
    /// CORS origin whitelist.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            database_url: "postgres://localhost/lorekeep".to_string(),
            max_batch_files: defaults::MAX_BATCH_FILES,
            max_upload_bytes: 2 * 1024 * 1024 * 1024,
            event_bus_capacity: defaults::EVENT_BUS_CAPACITY,
            allowed_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

impl ServerConfig {
    /// Load from environment variables, falling back to defaults.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `HOST` | `0.0.0.0` |
    /// | `PORT` | `3000` |
    /// | `DATABASE_URL` | `postgres://localhost/lorekeep` |
    /// | `LOREKEEP_MAX_BATCH_FILES` | `100` |
    /// | `LOREKEEP_MAX_UPLOAD_MB` | `2048` |
    /// | `LOREKEEP_EVENT_BUS_CAPACITY` | `256` |
    /// | `ALLOWED_ORIGINS` | `http://localhost:3000` |
    pub fn from_env() -> Self {
        let base = Self::default();
        let parse = |key: &str| std::env::var(key).ok().and_then(|v| v.trim().parse::<usize>().ok());

        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|o| !o.is_empty())
            .unwrap_or(base.allowed_origins);

        Self {
            host: std::env::var("HOST").unwrap_or(base.host),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(base.port),
            database_url: std::env::var("DATABASE_URL").unwrap_or(base.database_url),
            max_batch_files: parse("LOREKEEP_MAX_BATCH_FILES")
                .unwrap_or(base.max_batch_files)
                .max(1),
            max_upload_bytes: parse("LOREKEEP_MAX_UPLOAD_MB")
                .map(|mb| mb.saturating_mul(1024 * 1024))
                .unwrap_or(base.max_upload_bytes),
            event_bus_capacity: parse("LOREKEEP_EVENT_BUS_CAPACITY")
                .unwrap_or(base.event_bus_capacity)
                .max(1),
            allowed_origins,
        }
    }

    /// Parsed CORS origins; invalid entries are logged and dropped.
    pub fn cors_origins(&self) -> Vec<HeaderValue> {
        self.allowed_origins
            .iter()
            .filter_map(|origin| match origin.parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!("Invalid CORS origin '{}': {}", origin, e);
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.max_batch_files, 100);
        assert_eq!(config.event_bus_capacity, 256);
    }

    #[test]
    fn test_invalid_origins_are_dropped() {
        let config = ServerConfig {
            allowed_origins: vec![
                "https://docs.example.com".to_string(),
                "bad\norigin".to_string(),
            ],
            ..Default::default()
        };
        assert_eq!(config.cors_origins().len(), 1);
    }
}
