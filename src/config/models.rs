//! Configuration data structures for uniapi.
//!
//! The top level maps URL path segments to capability envelopes. Each envelope
//! names a registered type tag and carries an opaque, type specific `config`
//! blob that only the matching constructor interprets. Envelopes nest: a
//! service config may itself contain commander or streamer envelopes.
use std::{collections::HashMap, fmt, time::Duration};

use serde::{Deserialize, Serialize};

fn default_listen_addr() -> String {
    "127.0.0.1:8000".to_string()
}

/// The `{type, config}` envelope used for every capability in the config tree.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CapabilityConfig {
    /// Registered type tag, e.g. `"csgo"` or `"rcon"`
    #[serde(rename = "type")]
    pub kind: String,
    /// Type specific configuration handed to the constructor verbatim
    #[serde(default)]
    pub config: serde_json::Value,
}

impl CapabilityConfig {
    pub fn new(kind: impl Into<String>, config: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            config,
        }
    }
}

impl fmt::Display for CapabilityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

/// Routing table handed to the dispatch server: path segment -> service envelope.
pub type ServiceSet = HashMap<String, CapabilityConfig>;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default)]
    pub services: ServiceSet,
}

impl ServerConfig {
    /// Create a new server configuration builder
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            services: HashMap::new(),
        }
    }
}

/// Builder for ServerConfig to allow for cleaner configuration creation
#[derive(Default)]
pub struct ServerConfigBuilder {
    listen_addr: Option<String>,
    services: ServiceSet,
}

impl ServerConfigBuilder {
    /// Set the listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = Some(addr.into());
        self
    }

    /// Mount a service envelope at the given path segment
    pub fn service(mut self, path: impl Into<String>, config: CapabilityConfig) -> Self {
        self.services.insert(path.into(), config);
        self
    }

    /// Build the final ServerConfig
    pub fn build(self) -> Result<ServerConfig, String> {
        if self.services.is_empty() {
            return Err("At least one service must be configured".to_string());
        }

        Ok(ServerConfig {
            listen_addr: self.listen_addr.unwrap_or_else(default_listen_addr),
            services: self.services,
        })
    }
}

/// Parse a humantime duration string, falling back to `default` when the
/// string is empty or malformed.
pub fn parse_duration_or(value: Option<&str>, default: Duration) -> Duration {
    match value.map(str::trim) {
        None | Some("") => default,
        Some(s) => match humantime::parse_duration(s) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(
                    "Invalid duration {:?} ({}), using {}",
                    s,
                    e,
                    humantime::format_duration(default)
                );
                default
            }
        },
    }
}
