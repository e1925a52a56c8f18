use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

use crate::audit::entry::ChainKeys;
use crate::collector::DEFAULT_MAX_RANGE;
use crate::error::AuditChainError;
use crate::redaction::{RedactionFilter, DEFAULT_SENSITIVE_KEYS};

/// Optional config file looked up in the working directory (any supported extension).
pub const DEFAULT_CONFIG_FILE: &str = "audit-chain";

/// Prefix for environment overrides, e.g. `AUDIT_CHAIN_DATABASE_URL`.
pub const ENV_PREFIX: &str = "AUDIT_CHAIN";

/// Settings of the collector service.
#[derive(Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub emitter_secret: String,
    pub collector_secret: String,
    pub sensitive_keys: Vec<String>,
    pub max_range: u64,
}

/// Settings of an emitting process.
#[derive(Clone, Serialize, Deserialize)]
pub struct EmitterConfig {
    pub collector_url: String,
    pub emitter_secret: String,
    pub sensitive_keys: Vec<String>,
    pub queue_capacity: usize,
    pub max_retries: u32,
    pub request_timeout_secs: u64,
}

impl CollectorConfig {
    pub fn load() -> Result<Self, AuditChainError> {
        Self::load_from(None)
    }

    /// Defaults, then `audit-chain.*` (or `path`), then `AUDIT_CHAIN_*` variables.
    pub fn load_from(path: Option<&Path>) -> Result<Self, AuditChainError> {
        let config: Self = layered(path)?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AuditChainError> {
        require_secret("emitter_secret", &self.emitter_secret)?;
        require_secret("collector_secret", &self.collector_secret)?;

        if self.emitter_secret == self.collector_secret {
            return Err(AuditChainError::ConfigError(
                "emitter_secret and collector_secret must differ".to_string(),
            ));
        }

        if self.max_range == 0 {
            return Err(AuditChainError::ConfigError(
                "max_range must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn chain_keys(&self) -> ChainKeys {
        ChainKeys::new(self.emitter_secret.as_bytes(), self.collector_secret.as_bytes())
    }

    pub fn redaction_filter(&self) -> RedactionFilter {
        RedactionFilter::new(self.sensitive_keys.iter().cloned())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, AuditChainError> {
        format!("{}:{}", self.server_host, self.server_port)
            .parse()
            .map_err(|e| {
                AuditChainError::ConfigError(format!(
                    "Invalid listen address {}:{}: {}",
                    self.server_host, self.server_port, e
                ))
            })
    }
}

impl EmitterConfig {
    pub fn load() -> Result<Self, AuditChainError> {
        Self::load_from(None)
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self, AuditChainError> {
        let config: Self = layered(path)?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AuditChainError> {
        require_secret("emitter_secret", &self.emitter_secret)?;

        if self.collector_url.trim().is_empty() {
            return Err(AuditChainError::ConfigError(
                "collector_url must be set".to_string(),
            ));
        }

        if self.queue_capacity == 0 {
            return Err(AuditChainError::ConfigError(
                "queue_capacity must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn redaction_filter(&self) -> RedactionFilter {
        RedactionFilter::new(self.sensitive_keys.iter().cloned())
    }
}

fn layered(path: Option<&Path>) -> Result<Config, AuditChainError> {
    let mut builder = defaults()?.add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false));

    if let Some(path) = path {
        builder = builder.add_source(File::from(path).required(true));
    }

    let config = builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("sensitive_keys"),
        )
        .build()?;

    Ok(config)
}

fn defaults() -> Result<ConfigBuilder<DefaultState>, AuditChainError> {
    let builder = Config::builder()
        .set_default("database_url", "sqlite://audit-chain.db")?
        .set_default("server_host", "0.0.0.0")?
        .set_default("server_port", 8001)?
        .set_default("emitter_secret", "")?
        .set_default("collector_secret", "")?
        .set_default("sensitive_keys", DEFAULT_SENSITIVE_KEYS.to_vec())?
        .set_default("max_range", DEFAULT_MAX_RANGE)?
        .set_default("collector_url", "http://localhost:8001")?
        .set_default("queue_capacity", 1024)?
        .set_default("max_retries", 3)?
        .set_default("request_timeout_secs", 10)?;

    Ok(builder)
}

fn require_secret(name: &str, value: &str) -> Result<(), AuditChainError> {
    if value.is_empty() {
        return Err(AuditChainError::ConfigError(format!("{} must be set", name)));
    }
    Ok(())
}

impl std::fmt::Debug for CollectorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorConfig")
            .field("database_url", &self.database_url)
            .field("server_host", &self.server_host)
            .field("server_port", &self.server_port)
            .field("emitter_secret", &"<redacted>")
            .field("collector_secret", &"<redacted>")
            .field("sensitive_keys", &self.sensitive_keys)
            .field("max_range", &self.max_range)
            .finish()
    }
}

impl std::fmt::Debug for EmitterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmitterConfig")
            .field("collector_url", &self.collector_url)
            .field("emitter_secret", &"<redacted>")
            .field("sensitive_keys", &self.sensitive_keys)
            .field("queue_capacity", &self.queue_capacity)
            .field("max_retries", &self.max_retries)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}
