//! Configuration loaded from environment variables.

use std::env;

use anyhow::{Context, Result};

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port (default: 3000).
    pub port: u16,

    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Maximum database connections in pool (default: 10).
    pub database_max_connections: u32,

    /// CORS allowed origins (comma-separated, default: "*").
    pub cors_allowed_origins: Vec<String>,

    /// Maximum page size accepted by search requests (default: 100).
    pub max_page_size: u64,

    /// Currencies eligible for price aggregation (default: USD,GBP,EUR).
    pub price_currencies: Vec<String>,

    /// Price type codes eligible for price aggregation (default: BYO,SUB).
    pub price_type_codes: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("PORT must be a valid u16")?;

        let database_url =
            env::var("DATABASE_URL").context("DATABASE_URL environment variable is required")?;

        let database_max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .context("DATABASE_MAX_CONNECTIONS must be a valid u32")?;

        let cors_allowed_origins = env::var("CORS_ALLOWED_ORIGINS")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_else(|_| vec!["*".to_string()]);

        let max_page_size = env::var("MAX_PAGE_SIZE")
            .unwrap_or_else(|_| "100".to_string())
            .parse()
            .context("MAX_PAGE_SIZE must be a valid u64")?;

        let price_currencies = csv_var("PRICE_CURRENCIES", &["USD", "GBP", "EUR"]);
        let price_type_codes = csv_var("PRICE_TYPE_CODES", &["BYO", "SUB"]);

        Ok(Self {
            port,
            database_url,
            database_max_connections,
            cors_allowed_origins,
            max_page_size,
            price_currencies,
            price_type_codes,
        })
    }
}

/// Read a comma-separated env var, falling back to the given defaults.
fn csv_var(name: &str, defaults: &[&str]) -> Vec<String> {
    env::var(name)
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_else(|_| defaults.iter().map(|s| s.to_string()).collect())
}
