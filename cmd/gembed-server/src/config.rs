//! Server configuration, loaded from YAML.

use std::net::SocketAddr;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default listen address.
pub const DEFAULT_LISTEN: &str = ":8080";
/// Default cap on texts per request.
pub const DEFAULT_MAX_TEXTS: usize = 256;

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address; ":port" binds all interfaces.
    pub listen: String,

    /// Maximum texts per request. 0 means unlimited.
    pub max_texts: usize,

    /// Method used when a request leaves it out.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub default_method: String,

    /// Model used when a request leaves it out.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub default_model: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            max_texts: DEFAULT_MAX_TEXTS,
            default_method: String::new(),
            default_model: String::new(),
        }
    }
}

impl ServerConfig {
    /// Loads a config file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::parse(&data).with_context(|| format!("failed to parse config {}", path.display()))
    }

    pub fn parse(data: &str) -> Result<Self> {
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(data)?)
    }

    /// Resolves `listen` to a socket address.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        parse_addr(&self.listen)
    }
}

/// Parses an address, expanding ":port" to "0.0.0.0:port".
pub fn parse_addr(addr: &str) -> Result<SocketAddr> {
    let addr = if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    };
    addr.parse()
        .with_context(|| format!("invalid listen address {addr:?}"))
}
