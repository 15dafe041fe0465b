//! Registry backed by sorted service and key vectors

use async_trait::async_trait;
use glb_core::{is_reserved, GlbError, GlbResult, RegistrySnapshot, ServiceSnapshot, Target};
use tokio::sync::RwLock;
use tracing::debug;

use super::{check_reserved, KeyEntry, Registry};

#[derive(Debug)]
struct ServiceEntry {
    name: String,
    /// Sorted by name
    keys: Vec<KeyEntry>,
}

impl ServiceEntry {
    fn key(&self, key: &str) -> Option<&KeyEntry> {
        self.keys
            .binary_search_by(|k| k.name.as_str().cmp(key))
            .ok()
            .map(|i| &self.keys[i])
    }

    fn key_mut(&mut self, key: &str) -> Option<&mut KeyEntry> {
        match self.keys.binary_search_by(|k| k.name.as_str().cmp(key)) {
            Ok(i) => Some(&mut self.keys[i]),
            Err(_) => None,
        }
    }
}

/// Registry holding services and keys in name order
pub struct StandardRegistry {
    /// Sorted by name
    services: RwLock<Vec<ServiceEntry>>,
    dedup: bool,
}

impl StandardRegistry {
    /// Create an empty registry that appends duplicates
    pub fn new() -> Self {
        Self::with_dedup(false)
    }

    /// Create an empty registry; `dedup` skips adds of an address already under the key
    pub fn with_dedup(dedup: bool) -> Self {
        Self {
            services: RwLock::new(Vec::new()),
            dedup,
        }
    }
}

impl Default for StandardRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn service_index(services: &[ServiceEntry], service: &str) -> Result<usize, usize> {
    services.binary_search_by(|s| s.name.as_str().cmp(service))
}

fn find_key<'a>(services: &'a [ServiceEntry], service: &str, key: &str) -> Option<&'a KeyEntry> {
    service_index(services, service)
        .ok()
        .and_then(|i| services[i].key(key))
}

fn find_key_mut<'a>(
    services: &'a mut [ServiceEntry],
    service: &str,
    key: &str,
) -> Option<&'a mut KeyEntry> {
    match service_index(services, service) {
        Ok(i) => services[i].key_mut(key),
        Err(_) => None,
    }
}

#[async_trait]
impl Registry for StandardRegistry {
    async fn add(&self, service: &str, key: &str, target: Target) {
        let mut services = self.services.write().await;

        let s = match service_index(&services, service) {
            Ok(i) => i,
            Err(i) => {
                services.insert(
                    i,
                    ServiceEntry {
                        name: service.to_string(),
                        keys: Vec::new(),
                    },
                );
                i
            }
        };

        let entry = &mut services[s];
        let k = match entry.keys.binary_search_by(|k| k.name.as_str().cmp(key)) {
            Ok(i) => i,
            Err(i) => {
                entry.keys.insert(i, KeyEntry::new(key));
                i
            }
        };

        debug!(
            service = %service,
            key = %key,
            address = %target.address,
            "Registered target"
        );
        entry.keys[k].push(target, self.dedup);
    }

    async fn delete(&self, service: &str, key: &str, address: &str) {
        let mut services = self.services.write().await;

        let Ok(s) = service_index(&services, service) else {
            return;
        };
        let entry = &mut services[s];
        let Ok(k) = entry.keys.binary_search_by(|k| k.name.as_str().cmp(key)) else {
            return;
        };

        let removed = entry.keys[k].remove(address);
        if entry.keys[k].targets.is_empty() {
            entry.keys.remove(k);
        }
        if entry.keys.is_empty() {
            services.remove(s);
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
        match find_key(&services, service, key) {
            Some(entry) if !entry.targets.is_empty() => Ok(entry.targets.clone()),
            _ => Err(GlbError::service_not_found(service, key)),
        }
    }

    async fn validate(&self) -> GlbResult<()> {
        let services = self.services.read().await;
        for service in services.iter() {
            if is_reserved(&service.name) {
                return Err(GlbError::ServiceNameNotAllowed(service.name.clone()));
            }
            if let Some(key) = service.keys.iter().find(|k| is_reserved(&k.name)) {
                return Err(GlbError::ServiceNameNotAllowed(key.name.clone()));
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
        find_key_mut(&mut services, service, key)
            .and_then(|entry| entry.target_mut(address))
            .map(|target| target.increment_failures(amount))
            .ok_or_else(|| GlbError::service_not_found(service, key))
    }

    async fn round_robin_counter(&self, service: &str, key: &str) -> GlbResult<usize> {
        let services = self.services.read().await;
        find_key(&services, service, key)
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
        let entry = find_key_mut(&mut services, service, key)
            .ok_or_else(|| GlbError::service_not_found(service, key))?;
        entry.cursor = value;
        Ok(entry.cursor)
    }

    async fn snapshot(&self) -> RegistrySnapshot {
        let services = self.services.read().await;
        services
            .iter()
            .map(|s| ServiceSnapshot {
                service: s.name.clone(),
                keys: s.keys.iter().map(KeyEntry::snapshot).collect(),
            })
            .collect()
    }
}
