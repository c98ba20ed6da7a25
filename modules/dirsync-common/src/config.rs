use std::path::Path;

use serde::Deserialize;

use crate::error::SyncError;

/// Default location of the service configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Connection parameters for one LDAP directory.
#[derive(Debug, Clone, Deserialize)]
pub struct LdapEndpoint {
    pub url: String,
    pub bind_dn: String,
    pub bind_password: String,
    pub base_dn: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub database: String,
    /// Path to a file holding the database password.
    #[serde(default)]
    pub password_file: String,
    #[serde(default = "default_sslmode")]
    pub sslmode: String,
}

/// Retry tuning for hook POSTs. Delays double per attempt up to the cap,
/// jittered ±10%.
#[derive(Debug, Clone, Deserialize)]
pub struct HookRetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for HookRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Service configuration loaded from the YAML config file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub source: LdapEndpoint,
    pub target: LdapEndpoint,
    #[serde(default)]
    pub hooks: Vec<String>,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub hook_retry: HookRetryConfig,
    /// REST listen port.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("reading {}: {e}", path.display())))?;
        let config: Config = serde_yaml::from_str(&raw)
            .map_err(|e| SyncError::Config(format!("parsing {}: {e}", path.display())))?;
        Ok(config)
    }

    /// Read the database password from the configured file, trimming the
    /// trailing newline most secret mounts include.
    pub fn database_password(&self) -> Result<String, SyncError> {
        let raw = std::fs::read_to_string(&self.database.password_file).map_err(|e| {
            SyncError::Config(format!(
                "reading database password file {}: {e}",
                self.database.password_file
            ))
        })?;
        Ok(raw.trim().to_string())
    }

    /// Log a redacted summary of the loaded configuration.
    pub fn log_redacted(&self) {
        tracing::info!(
            source = %self.source.url,
            target = %self.target.url,
            hooks = self.hooks.len(),
            database = self.database.enabled,
            port = self.port,
            "Configuration loaded"
        );
    }
}

/// Resolve the effective log level: CLI flag, then `LOG_LEVEL`, then "info".
pub fn resolve_log_level(cli: Option<&str>) -> String {
    cli.map(str::to_string)
        .or_else(|| std::env::var("LOG_LEVEL").ok())
        .unwrap_or_else(|| "info".to_string())
}

fn default_db_port() -> u16 {
    5432
}

fn default_sslmode() -> String {
    "disable".to_string()
}

fn default_max_retries() -> u32 {
    10
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_port() -> u16 {
    5500
}
