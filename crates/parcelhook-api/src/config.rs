//! Configuration management for the parcelhook service.
//!
//! Values are layered with figment: built-in defaults, then an optional
//! `config.toml` in the working directory, then un-prefixed environment
//! variables. The merged result is validated before use.

use std::{collections::HashMap, net::SocketAddr, str::FromStr};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use parcelhook_retry::RetryPolicy;
use serde::{Deserialize, Serialize};

/// Configuration file looked up in the working directory.
const CONFIG_FILE: &str = "config.toml";

/// Service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// PostgreSQL connection URL.
    ///
    /// Environment variable: `DATABASE_URL`
    #[serde(default = "default_database_url", alias = "DATABASE_URL")]
    pub database_url: String,

    /// Maximum number of pooled connections.
    ///
    /// Environment variable: `DATABASE_MAX_CONNECTIONS`
    #[serde(default = "default_max_connections", alias = "DATABASE_MAX_CONNECTIONS")]
    pub database_max_connections: u32,

    /// Minimum number of pooled connections.
    ///
    /// Environment variable: `DATABASE_MIN_CONNECTIONS`
    #[serde(default = "default_min_connections", alias = "DATABASE_MIN_CONNECTIONS")]
    pub database_min_connections: u32,

    /// Seconds to wait when acquiring a connection.
    ///
    /// Environment variable: `DATABASE_CONNECTION_TIMEOUT`
    #[serde(default = "default_connection_timeout", alias = "DATABASE_CONNECTION_TIMEOUT")]
    pub database_connection_timeout: u64,

    /// Address the HTTP server binds to.
    ///
    /// Environment variable: `HOST`
    #[serde(default = "default_host", alias = "HOST")]
    pub host: String,

    /// Port the HTTP server binds to.
    ///
    /// Environment variable: `PORT`
    #[serde(default = "default_port", alias = "PORT")]
    pub port: u16,

    /// Per-request timeout in seconds.
    ///
    /// Environment variable: `REQUEST_TIMEOUT`
    #[serde(default = "default_request_timeout", alias = "REQUEST_TIMEOUT")]
    pub request_timeout: u64,

    /// Failed attempts before a queued callback is dead-lettered.
    ///
    /// Environment variable: `RETRY_MAX_ATTEMPTS`
    #[serde(default = "default_retry_max_attempts", alias = "RETRY_MAX_ATTEMPTS")]
    pub retry_max_attempts: u32,

    /// Base backoff delay in seconds.
    ///
    /// Environment variable: `RETRY_BACKOFF_SECONDS`
    #[serde(default = "default_retry_backoff_seconds", alias = "RETRY_BACKOFF_SECONDS")]
    pub retry_backoff_seconds: u64,

    /// Whether transient failures are queued and the retry worker runs.
    ///
    /// Environment variable: `RETRY_ENABLED`
    #[serde(default = "default_retry_enabled", alias = "RETRY_ENABLED")]
    pub retry_enabled: bool,

    /// Due records claimed per worker pass.
    ///
    /// Environment variable: `RETRY_BATCH_SIZE`
    #[serde(default = "default_retry_batch_size", alias = "RETRY_BATCH_SIZE")]
    pub retry_batch_size: usize,

    /// Seconds the worker idles when nothing is due.
    ///
    /// Environment variable: `RETRY_POLL_INTERVAL_SECONDS`
    #[serde(default = "default_retry_poll_interval", alias = "RETRY_POLL_INTERVAL_SECONDS")]
    pub retry_poll_interval_seconds: u64,

    /// Log filter used when `RUST_LOG` is not set.
    ///
    /// Environment variable: `RUST_LOG`
    #[serde(default = "default_log_level", alias = "RUST_LOG")]
    pub rust_log: String,

    /// Callback credentials per provider slug.
    ///
    /// Usually set in `config.toml` under `[providers.<slug>]`.
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

/// Callback credentials for one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Shared secret the provider sends with every callback.
    pub token: String,

    /// Header carrying the shared secret.
    #[serde(default = "default_token_header")]
    pub token_header: String,
}

impl Config {
    /// Loads configuration from defaults, `config.toml` and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the merged values
    /// fail validation.
    pub fn load() -> Result<Self> {
        let config: Self = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(""))
            .extract()
            .context("Failed to load configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Retry policy derived from the `retry_*` settings.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            backoff_seconds: self.retry_backoff_seconds,
            enabled: self.retry_enabled,
        }
    }

    /// Socket address for the HTTP server.
    ///
    /// # Errors
    ///
    /// Returns an error if `host` and `port` do not form a valid address.
    pub fn parse_server_addr(&self) -> Result<SocketAddr> {
        SocketAddr::from_str(&format!("{}:{}", self.host, self.port))
            .context("Invalid server address")
    }

    /// Database URL with the password replaced, for logging.
    pub fn database_url_masked(&self) -> String {
        if let Some(at_pos) = self.database_url.find('@') {
            if let Some(colon_pos) = self.database_url[..at_pos].rfind(':') {
                if colon_pos > self.database_url.find("://").map_or(0, |p| p + 2) {
                    let mut masked = self.database_url.clone();
                    masked.replace_range(colon_pos + 1..at_pos, "***");
                    return masked;
                }
            }
        }
        self.database_url.clone()
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must be greater than 0");
        }

        if self.database_max_connections == 0 {
            anyhow::bail!("database max_connections must be greater than 0");
        }

        if self.database_min_connections > self.database_max_connections {
            anyhow::bail!("database min_connections cannot exceed max_connections");
        }

        self.to_retry_policy().validate().context("invalid retry settings")?;

        if self.retry_batch_size == 0 {
            anyhow::bail!("retry_batch_size must be greater than 0");
        }

        if self.retry_poll_interval_seconds == 0 {
            anyhow::bail!("retry_poll_interval_seconds must be greater than 0");
        }

        for (slug, provider) in &self.providers {
            if provider.token.is_empty() {
                anyhow::bail!("provider {slug} has an empty callback token");
            }
            if provider.token_header.is_empty() {
                anyhow::bail!("provider {slug} has an empty token header");
            }
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            database_max_connections: default_max_connections(),
            database_min_connections: default_min_connections(),
            database_connection_timeout: default_connection_timeout(),
            host: default_host(),
            port: default_port(),
            request_timeout: default_request_timeout(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_backoff_seconds: default_retry_backoff_seconds(),
            retry_enabled: default_retry_enabled(),
            retry_batch_size: default_retry_batch_size(),
            retry_poll_interval_seconds: default_retry_poll_interval(),
            rust_log: default_log_level(),
            providers: HashMap::new(),
        }
    }
}

fn default_database_url() -> String {
    "postgresql://localhost/parcelhook".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connection_timeout() -> u64 {
    10
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    30
}

fn default_retry_max_attempts() -> u32 {
    5
}

fn default_retry_backoff_seconds() -> u64 {
    60
}

fn default_retry_enabled() -> bool {
    true
}

fn default_retry_batch_size() -> usize {
    10
}

fn default_retry_poll_interval() -> u64 {
    30
}

fn default_log_level() -> String {
    "info,parcelhook=debug,tower_http=debug".to_string()
}

fn default_token_header() -> String {
    "x-callback-token".to_string()
}
