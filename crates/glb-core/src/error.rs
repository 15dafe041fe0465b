//! Error types for glb

use thiserror::Error;

/// Main error type for glb
#[derive(Error, Debug)]
pub enum GlbError {
    /// Request path does not carry a service and a key
    #[error("proxy: invalid path to resource")]
    InvalidPath,

    /// Synthetic upstream host did not decode to service/key
    #[error("proxy: invalid service/key target: {0}")]
    InvalidTarget(String),

    /// Unknown service/key, or a key without targets
    #[error("service not found: {service}/{key}")]
    ServiceNotFound { service: String, key: String },

    /// Reserved word used as a service or key value
    #[error("service name not allowed: {0}")]
    ServiceNameNotAllowed(String),

    /// Every candidate failed for this request
    #[error("no endpoint available for {service}/{key}")]
    NoEndpointAvailable { service: String, key: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// TLS setup error
    #[error("TLS error: {0}")]
    Tls(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GlbError {
    pub fn service_not_found(service: &str, key: &str) -> Self {
        GlbError::ServiceNotFound {
            service: service.to_string(),
            key: key.to_string(),
        }
    }

    pub fn no_endpoint_available(service: &str, key: &str) -> Self {
        GlbError::NoEndpointAvailable {
            service: service.to_string(),
            key: key.to_string(),
        }
    }
}

/// Result type for glb operations
pub type GlbResult<T> = Result<T, GlbError>;

impl From<serde_json::Error> for GlbError {
    fn from(err: serde_json::Error) -> Self {
        GlbError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for GlbError {
    fn from(err: toml::de::Error) -> Self {
        GlbError::Config(err.to_string())
    }
}
