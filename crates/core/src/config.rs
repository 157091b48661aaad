//! # Conduit Configuration
//!
//! Persisted in `.conduit/config.json`. Every field has a default, so a
//! missing file or a partial file is fine. Environment variables override
//! the file; CLI flags override both (applied by the binary).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub gateway: GatewayConfig,
    pub pipeline: PipelineConfig,
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5005,
        }
    }
}

/// Persistence backend
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Sqlite,
    Memory,
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown store kind '{}' (sqlite, memory)", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub sqlite_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Sqlite,
            sqlite_path: ".conduit/conduit.db".to_string(),
        }
    }
}

/// How agent replies are produced
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GatewayMode {
    /// Call the external agent service over HTTP
    #[default]
    Http,
    /// Canned in-process replies, no external service
    Simulated,
}

impl FromStr for GatewayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "simulated" => Ok(Self::Simulated),
            other => Err(format!("unknown gateway mode '{}' (http, simulated)", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    pub mode: GatewayMode,
    /// Base URL of the agent service (e.g., "http://localhost:8000")
    pub base_url: String,
    /// Model name forwarded with every request
    pub prompt_model_name: String,
    pub timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            mode: GatewayMode::Http,
            base_url: "http://localhost:8000".to_string(),
            prompt_model_name: "gpt-4".to_string(),
            timeout_secs: 60,
        }
    }
}

impl GatewayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// How the opening message of a freshly started stage is produced
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SeedMode {
    /// "Starting {name}. How would you like to proceed?"
    #[default]
    Template,
    /// Ask the gateway, seeded with the approved stage's history
    Gateway,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Scan reply text for approval markers when the gateway sends no flag
    pub sentinel_fallback: bool,
    pub seed_mode: SeedMode,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sentinel_fallback: true,
            seed_mode: SeedMode::Template,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NotificationConfig {
    /// Events buffered per subscriber before the oldest are dropped
    pub capacity: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self { capacity: 100 }
    }
}

impl Config {
    pub const DEFAULT_PATH: &'static str = ".conduit/config.json";

    /// Load from a JSON file; a missing file yields defaults
    pub async fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config in {}", path.display()))
    }

    pub async fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any variable lookup
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup("BACKEND_URL") {
            self.gateway.base_url = url;
        }
        if let Some(mode) = lookup("CONDUIT_GATEWAY_MODE") {
            self.gateway.mode = mode.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(secs) = lookup("CONDUIT_GATEWAY_TIMEOUT_SECS") {
            self.gateway.timeout_secs = secs
                .parse()
                .with_context(|| format!("CONDUIT_GATEWAY_TIMEOUT_SECS='{}'", secs))?;
        }
        if let Some(model) = lookup("CONDUIT_MODEL") {
            self.gateway.prompt_model_name = model;
        }
        if let Some(host) = lookup("CONDUIT_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("CONDUIT_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("CONDUIT_PORT='{}'", port))?;
        }
        if let Some(kind) = lookup("CONDUIT_STORE") {
            self.store.kind = kind.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(path) = lookup("CONDUIT_DB") {
            self.store.sqlite_path = path;
        }
        Ok(())
    }
}
