//! Configuration loading.
//!
//! Sources, lowest precedence first: built-in defaults, the JSON config file
//! (`~/.crewclause/config.json` unless a path is given), then environment
//! variables. `.env` files are loaded by the binary before this runs.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CrewError, Result};
use crate::providers::openai::{DEFAULT_API_BASE, DEFAULT_MODEL};

pub use crate::api::config::ServerConfig;
pub use crate::retry::RetryConfig;

/// Default system prompt for the contract assistant.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a contract assistant for airline crew members. \
Answer questions about the collective bargaining agreement in plain language, cite the \
relevant section when you can, and say so when the contract does not address the question. \
Do not give legal advice.";

/// Default cap on question length, in characters.
pub const DEFAULT_MAX_QUERY_CHARS: usize = 4000;

/// Upstream chat API settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Per-request HTTP timeout.
    pub timeout_secs: u64,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            timeout_secs: 120,
            temperature: Some(0.2),
            max_tokens: Some(1024),
        }
    }
}

/// Where cached answers live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// Process memory; lost on restart.
    Memory,
    /// JSON file on disk (default).
    #[default]
    File,
}

impl std::str::FromStr for CacheBackend {
    type Err = CrewError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            other => Err(CrewError::Config(format!("unknown cache backend '{other}'"))),
        }
    }
}

/// Answer cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub backend: CacheBackend,
    /// File store location; defaults to `~/.crewclause/cache/responses.json`.
    pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: CacheBackend::File,
            path: None,
        }
    }
}

/// Prompting and request validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    pub system_prompt: String,
    pub max_query_chars: usize,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_query_chars: DEFAULT_MAX_QUERY_CHARS,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderConfig,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    pub server: ServerConfig,
    pub assistant: AssistantConfig,
}

impl Config {
    /// Default config file location: `~/.crewclause/config.json`.
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// `~/.crewclause`.
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".crewclause")
    }

    /// Parse a config file. Missing sections and fields take their defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            CrewError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&data)
            .map_err(|e| CrewError::Config(format!("invalid config {}: {e}", path.display())))
    }

    /// Load from `path` (or the default location), apply environment
    /// overrides, and validate.
    ///
    /// An explicit path must exist; the default location may be absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::load_from_path(p)?,
            None => {
                let default_path = Self::path();
                if default_path.exists() {
                    Self::load_from_path(&default_path)?
                } else {
                    debug!(path = %default_path.display(), "No config file, using defaults");
                    Self::default()
                }
            }
        };
        config.apply_env_overrides_from(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `CREWCLAUSE_*` overrides read through `lookup`.
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("CREWCLAUSE_API_KEY").or_else(|| get("OPENAI_API_KEY")) {
            self.provider.api_key = Some(key);
        }
        if let Some(base) = get("CREWCLAUSE_API_BASE") {
            self.provider.api_base = base;
        }
        if let Some(model) = get("CREWCLAUSE_MODEL") {
            self.provider.model = model;
        }
        if let Some(bind) = get("CREWCLAUSE_BIND") {
            self.server.bind = bind;
        }
        if let Some(port) = get("CREWCLAUSE_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| CrewError::Config(format!("CREWCLAUSE_PORT is not a port: {port}")))?;
        }
        if let Some(token) = get("CREWCLAUSE_API_TOKEN") {
            self.server.api_token = Some(token);
        }
        if let Some(backend) = get("CREWCLAUSE_CACHE_BACKEND") {
            self.cache.backend = backend.parse()?;
        }
        Ok(())
    }

    /// Reject settings that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.provider.model.trim().is_empty() {
            return Err(CrewError::Config("provider.model must not be empty".into()));
        }
        if self.provider.timeout_secs == 0 {
            return Err(CrewError::Config("provider.timeout_secs must be > 0".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(CrewError::Config("retry.max_attempts must be >= 1".into()));
        }
        if self.server.port == 0 {
            return Err(CrewError::Config("server.port must be > 0".into()));
        }
        if self.assistant.max_query_chars == 0 {
            return Err(CrewError::Config(
                "assistant.max_query_chars must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Resolved file store path.
    pub fn cache_path(&self) -> PathBuf {
        self.cache
            .path
            .clone()
            .unwrap_or_else(|| Self::dir().join("cache").join("responses.json"))
    }
}
