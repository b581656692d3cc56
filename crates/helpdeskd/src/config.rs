//! Configuration management for helpdeskd.
//!
//! Loads settings from /etc/helpdesk/config.toml or uses defaults. Every field
//! has a default so a partial file is valid.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::store::DEFAULT_MAX_TURNS;

/// Config file path
pub const CONFIG_PATH: &str = "/etc/helpdesk/config.toml";

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Maximum accepted request body
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_max_body_bytes() -> usize {
    64 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Model endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Coarse socket-level timeout; the chain itself imposes none
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Model used for web-search retrieval
    #[serde(default = "default_retrieval_model")]
    pub retrieval_model: String,

    /// Site restriction prepended to retrieval queries, empty for none
    #[serde(default = "default_search_site")]
    pub search_site: String,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_request_timeout() -> u64 {
    120
}

fn default_retrieval_model() -> String {
    "gpt-4o".to_string()
}

fn default_search_site() -> String {
    "launchdarkly.com".to_string()
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            request_timeout_secs: default_request_timeout(),
            retrieval_model: default_retrieval_model(),
            search_site: default_search_site(),
        }
    }
}

impl OpenAiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Read the API key from the configured environment variable
    pub fn api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env)
            .with_context(|| format!("{} is not set", self.api_key_env))
    }
}

/// Bounds for one of the in-memory stores
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StoreConfig {
    pub capacity: usize,
    pub ttl_secs: u64,
}

impl StoreConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Session store bounds, plus how much history each session keeps
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SessionConfig {
    pub capacity: usize,
    pub ttl_secs: u64,
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

fn default_max_turns() -> usize {
    DEFAULT_MAX_TURNS
}

fn default_sessions() -> SessionConfig {
    SessionConfig {
        capacity: 10_000,
        ttl_secs: 24 * 60 * 60,
        max_turns: DEFAULT_MAX_TURNS,
    }
}

fn default_trackers() -> StoreConfig {
    StoreConfig {
        capacity: 10_000,
        ttl_secs: 60 * 60,
    }
}

/// Feature-gate source configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlagsConfig {
    /// TOML flag file, re-read when it changes. Built-in defaults when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Main daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub openai: OpenAiConfig,

    #[serde(default = "default_sessions")]
    pub sessions: SessionConfig,

    #[serde(default = "default_trackers")]
    pub trackers: StoreConfig,

    #[serde(default)]
    pub flags: FlagsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            openai: OpenAiConfig::default(),
            sessions: default_sessions(),
            trackers: default_trackers(),
            flags: FlagsConfig::default(),
        }
    }
}

impl Config {
    /// Load config from an explicit path, or from the default location with
    /// fallback to built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load_from_path(p),
            None => Ok(Self::load_from_path(Path::new(CONFIG_PATH)).unwrap_or_else(|e| {
                warn!("Config not found, using defaults: {:#}", e);
                Config::default()
            })),
        }
    }

    /// Load config from specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.bind, "127.0.0.1:8000");
        assert_eq!(config.sessions.capacity, 10_000);
        assert_eq!(config.sessions.max_turns, 50);
        assert_eq!(config.trackers.ttl(), Duration::from_secs(3600));
        assert!(config.flags.path.is_none());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\nbind = \"0.0.0.0:9000\"\n\n[sessions]\ncapacity = 5\nttl_secs = 60"
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.server.max_body_bytes, 64 * 1024);
        assert_eq!(config.sessions.capacity, 5);
        assert_eq!(config.sessions.max_turns, DEFAULT_MAX_TURNS);
        assert_eq!(config.openai.retrieval_model, "gpt-4o");
    }

    #[test]
    fn test_explicit_missing_path_is_error() {
        let missing = Path::new("/nonexistent/helpdesk/config.toml");
        assert!(Config::load(Some(missing)).is_err());
    }
}
