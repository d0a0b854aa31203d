//! Configuration loading and types for sodastore.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Each subsection governs a different part of the
//! system: the HTTP listener, logging, metrics, the public URL layout and
//! the list of document-store accounts that make up the pool.

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Image storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Document-store accounts, in pool order.
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Image storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Public prefix of stored image URLs; also the serve mount point.
    #[serde(default = "default_url_prefix")]
    pub url_prefix: String,

    /// Per-request timeout for document-store calls, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url_prefix: default_url_prefix(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Which document client backs an account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    /// Oracle REST Data Services with OAuth2 client credentials.
    #[default]
    Ords,
    /// In-process collection, for local runs and tests.
    Memory,
}

/// One document-store account.
///
/// ```yaml
/// accounts:
///   - alias: IMAGE
///     ords_url: https://example.adb.oraclecloudapps.com/ords/image
///     client_id: abc
///     client_secret_env: IMAGE_CLIENT_SECRET
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    /// Collection alias queried on this account.
    pub alias: String,

    /// Client kind: `ords` or `memory`.
    #[serde(default)]
    pub kind: AccountKind,

    /// Base ORDS URL of the schema, e.g. `https://host/ords/image`.
    #[serde(default)]
    pub ords_url: String,

    /// OAuth2 client id.
    #[serde(default)]
    pub client_id: String,

    /// OAuth2 client secret.
    #[serde(default)]
    pub client_secret: String,

    /// Environment variable to read the client secret from when
    /// `client_secret` is empty.
    #[serde(default)]
    pub client_secret_env: String,
}

impl AccountConfig {
    /// The client secret, falling back to `client_secret_env`.
    pub fn resolved_secret(&self) -> Option<String> {
        if !self.client_secret.is_empty() {
            return Some(self.client_secret.clone());
        }
        if self.client_secret_env.is_empty() {
            return None;
        }
        std::env::var(&self.client_secret_env)
            .ok()
            .filter(|s| !s.is_empty())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and the `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { metrics: true }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9013
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_url_prefix() -> String {
    "/content/images".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    parse_config(&contents)
}

/// Parse configuration from a YAML string.
pub fn parse_config(contents: &str) -> anyhow::Result<Config> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
}
