//! hive.toml configuration.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable consulted when `cloud.auth_token` is absent.
pub const TOKEN_ENV: &str = "API_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HiveConfig {
    /// Number of drone slots.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_listen_host")]
    pub listen_host: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    pub cloud: CloudConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    #[serde(default)]
    pub provider: Provider,
    pub region: String,
    pub size: String,
    pub image: ImageRef,
    pub ssh_key_name: String,
    #[serde(default = "default_tag")]
    pub tag: String,
    pub auth_token: Option<String>,
    pub api_url: Option<String>,
    /// Cap on droplet status polls; unbounded when absent.
    pub poll_attempts: Option<u32>,
    #[serde(default)]
    pub reclaim: ReclaimStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_port")]
    pub port: u16,
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// `user:password` sent as basic auth to the drone.
    pub auth: Option<String>,
    /// Cap on liveness probes; unbounded when absent.
    pub probe_attempts: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    DigitalOcean,
}

/// How idle reclamation removes droplets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReclaimStrategy {
    /// One delete-by-tag call.
    #[default]
    Tag,
    /// Delete each tracked droplet by id.
    Tracked,
}

/// Image as either a provider id or a name/slug.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImageRef {
    Id(u64),
    Name(String),
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageRef::Id(id) => write!(f, "{id}"),
            ImageRef::Name(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("pool_size must be at least 1")]
    EmptyPool,
    #[error("worker.idle_timeout_ms must be greater than 0")]
    ZeroIdleTimeout,
    #[error("cloud.tag must not be empty")]
    EmptyTag,
}

impl HiveConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: HiveConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::EmptyPool);
        }
        if self.worker.idle_timeout_ms == 0 {
            return Err(ConfigError::ZeroIdleTimeout);
        }
        if self.cloud.tag.trim().is_empty() {
            return Err(ConfigError::EmptyTag);
        }
        Ok(())
    }

    /// `host:port` the proxy listens on.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }
}

impl CloudConfig {
    /// Configured token, falling back to `$API_TOKEN`.
    pub fn resolve_token(&self) -> Option<String> {
        self.auth_token
            .clone()
            .or_else(|| std::env::var(TOKEN_ENV).ok())
            .filter(|t| !t.is_empty())
    }
}

impl WorkerConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            port: default_worker_port(),
            idle_timeout_ms: default_idle_timeout_ms(),
            auth: None,
            probe_attempts: None,
        }
    }
}

fn default_pool_size() -> usize {
    4
}

fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    8000
}

fn default_tag() -> String {
    "hive".to_string()
}

fn default_worker_port() -> u16 {
    8000
}

fn default_idle_timeout_ms() -> u64 {
    5000
}
