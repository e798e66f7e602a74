//! Configuration management for Bookshelf Server

use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub metadata: MetadataConfig,
    pub import: ImportConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// External book metadata APIs and the fetch policy used against them
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataConfig {
    pub google_books_url: String,
    pub google_books_api_key: Option<String>,
    pub open_library_url: String,
    pub open_library_covers_url: String,
    pub fetch_timeout_ms: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub google_books_min_interval_ms: u64,
    pub open_library_min_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImportConfig {
    /// Worker pool size for cover resolution
    pub cover_concurrency: usize,
    /// Language stored when a CSV row leaves it blank
    pub default_language: String,
}

impl MetadataConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            database: DatabaseConfig {
                url: "sqlite:./bookshelf.db".to_string(),
            },
            metadata: MetadataConfig::default(),
            import: ImportConfig::default(),
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        MetadataConfig {
            google_books_url: "https://www.googleapis.com/books/v1".to_string(),
            google_books_api_key: None,
            open_library_url: "https://openlibrary.org".to_string(),
            open_library_covers_url: "https://covers.openlibrary.org".to_string(),
            fetch_timeout_ms: 5000,
            max_retries: 2,
            backoff_base_ms: 1000,
            backoff_cap_ms: 3000,
            google_books_min_interval_ms: 250,
            open_library_min_interval_ms: 100,
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        ImportConfig {
            cover_concurrency: 15,
            default_language: "Italiano".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        let defaults = Config::default();
        let metadata = defaults.metadata;
        let import = defaults.import;

        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_var("SERVER_PORT", 3000),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:./bookshelf.db".to_string()),
            },
            metadata: MetadataConfig {
                google_books_url: env::var("GOOGLE_BOOKS_URL").unwrap_or(metadata.google_books_url),
                google_books_api_key: env::var("GOOGLE_BOOKS_API_KEY")
                    .ok()
                    .filter(|key| !key.trim().is_empty()),
                open_library_url: env::var("OPEN_LIBRARY_URL").unwrap_or(metadata.open_library_url),
                open_library_covers_url: env::var("OPEN_LIBRARY_COVERS_URL")
                    .unwrap_or(metadata.open_library_covers_url),
                fetch_timeout_ms: parse_var("FETCH_TIMEOUT_MS", metadata.fetch_timeout_ms),
                max_retries: parse_var("FETCH_MAX_RETRIES", metadata.max_retries),
                backoff_base_ms: parse_var("FETCH_BACKOFF_BASE_MS", metadata.backoff_base_ms),
                backoff_cap_ms: parse_var("FETCH_BACKOFF_CAP_MS", metadata.backoff_cap_ms),
                google_books_min_interval_ms: parse_var(
                    "GOOGLE_BOOKS_MIN_INTERVAL_MS",
                    metadata.google_books_min_interval_ms,
                ),
                open_library_min_interval_ms: parse_var(
                    "OPEN_LIBRARY_MIN_INTERVAL_MS",
                    metadata.open_library_min_interval_ms,
                ),
            },
            import: ImportConfig {
                cover_concurrency: parse_var("COVER_CONCURRENCY", import.cover_concurrency).max(1),
                default_language: env::var("DEFAULT_LANGUAGE").unwrap_or(import.default_language),
            },
        })
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}
