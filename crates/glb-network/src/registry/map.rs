//! Registry backed by nested hash maps

use async_trait::async_trait;
use glb_core::{is_reserved, GlbError, GlbResult, RegistrySnapshot, ServiceSnapshot, Target};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use super::{check_reserved, KeyEntry, Registry};

type ServicesMap = HashMap<String, HashMap<String, KeyEntry>>;

/// Registry keyed by service name, then key name
pub struct MapRegistry {
    services: RwLock<ServicesMap>,
    dedup: bool,
}

impl MapRegistry {
    /// Create an empty registry that appends duplicates
    pub fn new() -> Self {
        Self::with_dedup(false)
    }

    /// Create an empty registry; `dedup` skips adds of an address already under the key
    pub fn with_dedup(dedup: bool) -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            dedup,
        }
    }
}

impl Default for MapRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Registry for MapRegistry {
    async fn add(&self, service: &str, key: &str, target: Target) {
        let mut services = self.services.write().await;

        debug!(
            service = %service,
            key = %key,
            address = %target.address,
            "Registered target"
        );
        services
            .entry(service.to_string())
            .or_default()
            .entry(key.to_string())
            .or_insert_with(|| KeyEntry::new(key))
            .push(target, self.dedup);
    }

    async fn delete(&self, service: &str, key: &str, address: &str) {
        let mut services = self.services.write().await;

        let Some(keys) = services.get_mut(service) else {
            return;
        };
        let Some(entry) = keys.get_mut(key) else {
            return;
        };

        let removed = entry.remove(address);
        if entry.targets.is_empty() {
            keys.remove(key);
        }
        if keys.is_empty() {
            services.remove(service);
        }

        debug!(
            service = %service,
            key = %key,
            address = %address,
            removed = removed,
            "Unregistered target"
        );
    }

    async fn lookup(&self, service: &str, key: &str) -> GlbResult<Vec<Target>> {
        check_reserved(service, key)?;
        let services = self.services.read().await;
        match services.get(service).and_then(|keys| keys.get(key)) {
            Some(entry) if !entry.targets.is_empty() => Ok(entry.targets.clone()),
            _ => Err(GlbError::service_not_found(service, key)),
        }
    }

    async fn validate(&self) -> GlbResult<()> {
        let services = self.services.read().await;
        for (service, keys) in services.iter() {
            if is_reserved(service) {
                return Err(GlbError::ServiceNameNotAllowed(service.clone()));
            }
            if let Some(key) = keys.keys().find(|k| is_reserved(k)) {
                return Err(GlbError::ServiceNameNotAllowed(key.clone()));
            }
        }
        Ok(())
    }

    async fn increment_failures(
        &self,
        service: &str,
        key: &str,
        address: &str,
        amount: u64,
    ) -> GlbResult<u64> {
        let mut services = self.services.write().await;
        services
            .get_mut(service)
            .and_then(|keys| keys.get_mut(key))
            .and_then(|entry| entry.target_mut(address))
            .map(|target| target.increment_failures(amount))
            .ok_or_else(|| GlbError::service_not_found(service, key))
    }

    async fn round_robin_counter(&self, service: &str, key: &str) -> GlbResult<usize> {
        let services = self.services.read().await;
        services
            .get(service)
            .and_then(|keys| keys.get(key))
            .map(|entry| entry.cursor)
            .ok_or_else(|| GlbError::service_not_found(service, key))
    }

    async fn set_round_robin_counter(
        &self,
        service: &str,
        key: &str,
        value: usize,
    ) -> GlbResult<usize> {
        let mut services = self.services.write().await;
        let entry = services
            .get_mut(service)
            .and_then(|keys| keys.get_mut(key))
            .ok_or_else(|| GlbError::service_not_found(service, key))?;
        entry.cursor = value;
        Ok(entry.cursor)
    }

    async fn snapshot(&self) -> RegistrySnapshot {
        let services = self.services.read().await;

        let mut snapshot: RegistrySnapshot = services
            .iter()
            .map(|(name, keys)| {
                let mut keys: Vec<_> = keys.values().map(KeyEntry::snapshot).collect();
                keys.sort_by(|a, b| a.key.cmp(&b.key));
                ServiceSnapshot {
                    service: name.clone(),
                    keys,
                }
            })
            .collect();
        snapshot.sort_by(|a, b| a.service.cmp(&b.service));
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    registry_contract_tests!(MapRegistry::new());

    #[tokio::test]
    async fn test_dedup_mode() {
        let registry = MapRegistry::with_dedup(true);
        for _ in 0..3 {
            registry.add("svc1", "v1", Target::new("127.0.0.1:8080")).await;
        }

        assert_eq!(registry.lookup("svc1", "v1").await.unwrap().len(), 1);
    }
}
