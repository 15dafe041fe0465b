//! Target and registry dump type definitions

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Words the HTTP surface claims for itself; never valid as a service or key.
pub const RESERVED_NAMES: [&str; 2] = ["status", "reload"];

/// Returns true if `value` collides with a reserved route.
pub fn is_reserved(value: &str) -> bool {
    RESERVED_NAMES.contains(&value)
}

/// Seed data for a registry: service -> key -> addresses
pub type RegistrySeed = BTreeMap<String, BTreeMap<String, Vec<String>>>;

/// One backend network endpoint and its failure counter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// "host:port"
    pub address: String,
    /// Dial failures observed so far
    pub failures: u64,
}

impl Target {
    /// Create a target with no recorded failures
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            failures: 0,
        }
    }

    /// Add `amount` to the failure counter and return the new count
    pub fn increment_failures(&mut self, amount: u64) -> u64 {
        self.failures = self.failures.saturating_add(amount);
        self.failures
    }
}

/// Point-in-time dump of one key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySnapshot {
    pub key: String,
    pub round_robin_cursor: usize,
    pub targets: Vec<Target>,
}

/// Point-in-time dump of one service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    pub service: String,
    pub keys: Vec<KeySnapshot>,
}

/// Point-in-time dump of a whole registry, services and keys sorted by name
pub type RegistrySnapshot = Vec<ServiceSnapshot>;
