//! Configuration module for invoice-chain-service.

use service_core::config as core_config;
use service_core::error::AppError;
use service_core::retry::RetryConfig;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct InvoicingConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub chain: ChainConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Without a URL the service keeps its chains in memory.
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Retry budget for sequence collisions while appending to a chain.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 20,
        }
    }
}

impl ChainConfig {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts.max(1),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            ..Default::default()
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}

impl InvoicingConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let chain_defaults = ChainConfig::default();

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "invoice-chain-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS").unwrap_or(10),
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS").unwrap_or(2),
            },
            chain: ChainConfig {
                max_attempts: parse_env("CHAIN_MAX_ATTEMPTS")
                    .unwrap_or(chain_defaults.max_attempts),
                initial_backoff_ms: parse_env("CHAIN_INITIAL_BACKOFF_MS")
                    .unwrap_or(chain_defaults.initial_backoff_ms),
            },
        })
    }

    /// Configuration for tests: ephemeral ports, in-memory store.
    pub fn for_tests() -> Self {
        Self {
            common: core_config::Config { port: 0 },
            service_name: "invoice-chain-service-test".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: "debug".to_string(),
            otlp_endpoint: None,
            database: DatabaseConfig {
                url: None,
                max_connections: 5,
                min_connections: 1,
            },
            chain: ChainConfig::default(),
        }
    }
}
