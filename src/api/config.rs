//! HTTP server configuration.

use serde::{Deserialize, Serialize};

/// Default request body cap: 1 MiB.
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

/// `server` section of the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (default: 127.0.0.1).
    pub bind: String,
    /// Port for the API server.
    pub port: u16,
    /// Static bearer token required on protected routes. `None` disables auth.
    pub api_token: Option<String>,
    /// Front-end origin allowed by CORS. `None` disables the CORS layer.
    pub allowed_origin: Option<String>,
    /// Maximum request body size in bytes.
    pub body_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8787,
            api_token: None,
            allowed_origin: None,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }
}

impl ServerConfig {
    /// `bind:port` socket address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
