//! Configuration types for glb

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{is_reserved, GlbError, GlbResult, RegistrySeed};

/// Main proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration
    pub host: HostConfig,
    /// Route everything to service=key="default"
    pub basic: bool,
    /// Never reuse upstream connections
    pub disable_keep_alives: bool,
    /// Idle upstream connection lifetime
    pub idle_conn_timeout_seconds: u64,
    /// Connect timeout for a single candidate
    pub dial_timeout_seconds: u64,
    /// Handshake timeout on the TLS listener
    pub tls_handshake_timeout_seconds: u64,
    /// Skip `add` when the address is already present under the key
    pub dedup_targets: bool,
    /// Registry representation
    pub registry_backend: RegistryBackend,
    /// TLS material (required when `host.ssl_port` is set)
    pub tls: Option<TlsConfig>,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Seed data: service -> key -> addresses
    pub registry: RegistrySeed,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: HostConfig::default(),
            basic: false,
            disable_keep_alives: false,
            idle_conn_timeout_seconds: 90,
            dial_timeout_seconds: 10,
            tls_handshake_timeout_seconds: 10,
            dedup_targets: false,
            registry_backend: RegistryBackend::Standard,
            tls: None,
            logging: LoggingConfig::default(),
            registry: RegistrySeed::new(),
        }
    }
}

impl ProxyConfig {
    /// Load configuration from a TOML file, or JSON when the extension is `.json`
    pub fn from_file(path: &Path) -> GlbResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GlbError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if is_json {
            serde_json::from_str(&content)
                .map_err(|e| GlbError::Config(format!("Failed to parse config: {}", e)))
        } else {
            toml::from_str(&content)
                .map_err(|e| GlbError::Config(format!("Failed to parse config: {}", e)))
        }
    }

    /// Reject configurations the proxy must not serve
    pub fn validate(&self) -> GlbResult<()> {
        for (service, keys) in &self.registry {
            if is_reserved(service) {
                return Err(GlbError::ServiceNameNotAllowed(service.clone()));
            }
            if let Some(key) = keys.keys().find(|k| is_reserved(k)) {
                return Err(GlbError::ServiceNameNotAllowed(key.clone()));
            }
        }

        if self.host.ssl_port.is_some() && self.tls.is_none() {
            return Err(GlbError::Config(
                "host.ssl_port is set but no [tls] section was given".to_string(),
            ));
        }

        Ok(())
    }

    pub fn idle_conn_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_conn_timeout_seconds)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_seconds)
    }

    pub fn tls_handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.tls_handshake_timeout_seconds)
    }
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Address to bind, also used in HTTPS redirect locations
    pub addr: String,
    /// Plain HTTP port
    pub port: u16,
    /// HTTPS port; when set the plain port only redirects
    pub ssl_port: Option<u16>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0".to_string(),
            port: 9090,
            ssl_port: None,
        }
    }
}

/// Registry representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryBackend {
    /// Sorted service/key vectors
    Standard,
    /// Nested hash maps
    Map,
}

/// TLS certificate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// PEM certificate chain
    pub cert_path: PathBuf,
    /// PEM private key
    pub key_path: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json or text)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}
