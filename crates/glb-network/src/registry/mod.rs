//! Service registry: service -> key -> ordered targets
//!
//! Every backing satisfies the same contract:
//! - `add` appends without deduplication unless the registry was built in dedup mode
//! - `delete` removes every target with a matching address, keeping survivor order,
//!   and prunes keys and services left empty
//! - `lookup` returns a detached copy of the targets and fails with
//!   `ServiceNotFound` for unknown, empty or reserved service/key pairs
//! - mutations and cursor writes take the instance's write lock, reads its read lock

use async_trait::async_trait;
use glb_core::{
    is_reserved, GlbError, GlbResult, KeySnapshot, ProxyConfig, RegistryBackend, RegistrySeed,
    RegistrySnapshot, Target,
};
use std::sync::Arc;
use tracing::{debug, info};

#[cfg(test)]
macro_rules! registry_contract_tests {
    ($new:expr) => {
        use glb_core::{GlbError, Target};

        #[tokio::test]
        async fn test_add_then_lookup() {
            let registry = $new;
            registry.add("svc1", "v1", Target::new("127.0.0.1:8080")).await;

            let targets = registry.lookup("svc1", "v1").await.unwrap();
            assert_eq!(targets, vec![Target::new("127.0.0.1:8080")]);
        }

        #[tokio::test]
        async fn test_add_distinct_addresses() {
            let registry = $new;
            for port in 0..5 {
                registry
                    .add("svc1", "v1", Target::new(format!("127.0.0.1:{}", 8080 + port)))
                    .await;
            }

            let targets = registry.lookup("svc1", "v1").await.unwrap();
            assert_eq!(targets.len(), 5);
            assert_eq!(targets[0].address, "127.0.0.1:8080");
            assert_eq!(targets[4].address, "127.0.0.1:8084");
        }

        #[tokio::test]
        async fn test_add_duplicate_grows() {
            let registry = $new;
            registry.add("svc1", "v1", Target::new("127.0.0.1:8080")).await;
            registry.add("svc1", "v1", Target::new("127.0.0.1:8080")).await;

            assert_eq!(registry.lookup("svc1", "v1").await.unwrap().len(), 2);
        }

        #[tokio::test]
        async fn test_keys_are_scoped_per_service() {
            let registry = $new;
            registry.add("svc1", "v1", Target::new("127.0.0.1:8080")).await;
            registry.add("svc2", "v1", Target::new("127.0.0.1:9090")).await;
            registry.add("svc1", "v2", Target::new("127.0.0.1:7070")).await;

            let targets = registry.lookup("svc2", "v1").await.unwrap();
            assert_eq!(targets, vec![Target::new("127.0.0.1:9090")]);
            let targets = registry.lookup("svc1", "v2").await.unwrap();
            assert_eq!(targets, vec![Target::new("127.0.0.1:7070")]);
        }

        #[tokio::test]
        async fn test_lookup_unknown() {
            let registry = $new;
            registry.add("svc1", "v1", Target::new("127.0.0.1:8080")).await;

            assert!(matches!(
                registry.lookup("svc2", "v1").await,
                Err(GlbError::ServiceNotFound { .. })
            ));
            assert!(matches!(
                registry.lookup("svc1", "v2").await,
                Err(GlbError::ServiceNotFound { .. })
            ));
        }

        #[tokio::test]
        async fn test_lookup_reserved() {
            let registry = $new;
            registry.add("status", "v1", Target::new("127.0.0.1:8080")).await;
            registry.add("svc1", "reload", Target::new("127.0.0.1:8080")).await;

            assert!(matches!(
                registry.lookup("status", "v1").await,
                Err(GlbError::ServiceNotFound { .. })
            ));
            assert!(matches!(
                registry.lookup("svc1", "reload").await,
                Err(GlbError::ServiceNotFound { .. })
            ));
        }

        #[tokio::test]
        async fn test_lookup_is_detached() {
            let registry = $new;
            registry.add("svc1", "v1", Target::new("127.0.0.1:8080")).await;
            registry.add("svc1", "v1", Target::new("127.0.0.1:8081")).await;

            let mut working = registry.lookup("svc1", "v1").await.unwrap();
            working.remove(0);
            registry
                .increment_failures("svc1", "v1", "127.0.0.1:8081", 1)
                .await
                .unwrap();

            assert_eq!(working[0].failures, 0);
            assert_eq!(registry.lookup("svc1", "v1").await.unwrap().len(), 2);
        }

        #[tokio::test]
        async fn test_delete_removes_all_matches_in_order() {
            let registry = $new;
            for address in ["a:1", "b:1", "a:1", "c:1", "a:1"] {
                registry.add("svc1", "v1", Target::new(address)).await;
            }

            registry.delete("svc1", "v1", "a:1").await;

            let addresses: Vec<String> = registry
                .lookup("svc1", "v1")
                .await
                .unwrap()
                .into_iter()
                .map(|t| t.address)
                .collect();
            assert_eq!(addresses, vec!["b:1", "c:1"]);
        }

        #[tokio::test]
        async fn test_delete_last_target() {
            let registry = $new;
            registry.add("svc1", "v1", Target::new("127.0.0.1:8080")).await;
            registry.delete("svc1", "v1", "127.0.0.1:8080").await;

            assert!(matches!(
                registry.lookup("svc1", "v1").await,
                Err(GlbError::ServiceNotFound { .. })
            ));
            assert!(registry.snapshot().await.is_empty());
        }

        #[tokio::test]
        async fn test_delete_absent_is_noop() {
            let registry = $new;
            registry.add("svc1", "v1", Target::new("127.0.0.1:8080")).await;

            registry.delete("svc1", "v1", "127.0.0.1:9999").await;
            registry.delete("svc1", "v9", "127.0.0.1:8080").await;
            registry.delete("svc9", "v1", "127.0.0.1:8080").await;

            assert_eq!(registry.lookup("svc1", "v1").await.unwrap().len(), 1);
        }

        #[tokio::test]
        async fn test_validate() {
            let registry = $new;
            registry.add("svc1", "v1", Target::new("127.0.0.1:8080")).await;
            assert!(registry.validate().await.is_ok());

            registry.add("svc1", "reload", Target::new("127.0.0.1:8080")).await;
            assert!(matches!(
                registry.validate().await,
                Err(GlbError::ServiceNameNotAllowed(name)) if name == "reload"
            ));

            let registry = $new;
            registry.add("status", "v1", Target::new("127.0.0.1:8080")).await;
            assert!(matches!(
                registry.validate().await,
                Err(GlbError::ServiceNameNotAllowed(name)) if name == "status"
            ));
        }

        #[tokio::test]
        async fn test_increment_failures() {
            let registry = $new;
            registry.add("svc1", "v1", Target::new("127.0.0.1:8080")).await;

            for expected in 1..=3 {
                let count = registry
                    .increment_failures("svc1", "v1", "127.0.0.1:8080", 1)
                    .await
                    .unwrap();
                assert_eq!(count, expected);
            }
            assert_eq!(registry.lookup("svc1", "v1").await.unwrap()[0].failures, 3);

            assert!(matches!(
                registry
                    .increment_failures("svc1", "v1", "127.0.0.1:9999", 1)
                    .await,
                Err(GlbError::ServiceNotFound { .. })
            ));
            assert!(matches!(
                registry
                    .increment_failures("svc2", "v1", "127.0.0.1:8080", 1)
                    .await,
                Err(GlbError::ServiceNotFound { .. })
            ));
        }

        #[tokio::test]
        async fn test_round_robin_counter() {
            let registry = $new;
            registry.add("svc1", "v1", Target::new("127.0.0.1:8080")).await;
            registry.add("svc1", "v2", Target::new("127.0.0.1:8081")).await;

            assert_eq!(registry.round_robin_counter("svc1", "v1").await.unwrap(), 0);
            assert_eq!(
                registry.set_round_robin_counter("svc1", "v1", 3).await.unwrap(),
                3
            );
            assert_eq!(registry.round_robin_counter("svc1", "v1").await.unwrap(), 3);
            // cursors are per key
            assert_eq!(registry.round_robin_counter("svc1", "v2").await.unwrap(), 0);

            assert!(matches!(
                registry.round_robin_counter("svc1", "v9").await,
                Err(GlbError::ServiceNotFound { .. })
            ));
            assert!(matches!(
                registry.set_round_robin_counter("svc9", "v1", 1).await,
                Err(GlbError::ServiceNotFound { .. })
            ));
        }

        #[tokio::test]
        async fn test_snapshot_sorted() {
            let registry = $new;
            registry.add("svc2", "v1", Target::new("b:1")).await;
            registry.add("svc1", "v2", Target::new("a:2")).await;
            registry.add("svc1", "v1", Target::new("a:1")).await;
            registry.set_round_robin_counter("svc1", "v2", 1).await.unwrap();

            let snapshot = registry.snapshot().await;
            let services: Vec<&str> = snapshot.iter().map(|s| s.service.as_str()).collect();
            assert_eq!(services, vec!["svc1", "svc2"]);
            let keys: Vec<&str> = snapshot[0].keys.iter().map(|k| k.key.as_str()).collect();
            assert_eq!(keys, vec!["v1", "v2"]);
            assert_eq!(snapshot[0].keys[1].round_robin_cursor, 1);
        }

        #[tokio::test]
        async fn test_concurrent_adds() {
            let registry = std::sync::Arc::new($new);
            let mut handles = Vec::new();

            for i in 0..16 {
                let registry = registry.clone();
                handles.push(tokio::spawn(async move {
                    registry
                        .add("svc1", "v1", Target::new(format!("127.0.0.1:{}", 10000 + i)))
                        .await;
                    let _ = registry.lookup("svc1", "v1").await;
                }));
            }
            for handle in handles {
                handle.await.unwrap();
            }

            assert_eq!(registry.lookup("svc1", "v1").await.unwrap().len(), 16);
        }
    };
}

pub mod map;
pub mod standard;

pub use map::MapRegistry;
pub use standard::StandardRegistry;

/// Capability interface shared by every registry representation
#[async_trait]
pub trait Registry: Send + Sync {
    /// Append a target under service/key, creating either if absent
    async fn add(&self, service: &str, key: &str, target: Target);

    /// Remove every target under service/key whose address matches
    async fn delete(&self, service: &str, key: &str, address: &str);

    /// Copy of the ordered targets for service/key
    async fn lookup(&self, service: &str, key: &str) -> GlbResult<Vec<Target>>;

    /// Fail if a reserved word is used as a service or key
    async fn validate(&self) -> GlbResult<()>;

    /// Add `amount` to the first target matching `address`; returns the new count
    async fn increment_failures(
        &self,
        service: &str,
        key: &str,
        address: &str,
        amount: u64,
    ) -> GlbResult<u64>;

    /// Current round-robin cursor for service/key
    async fn round_robin_counter(&self, service: &str, key: &str) -> GlbResult<usize>;

    /// Overwrite the round-robin cursor for service/key
    async fn set_round_robin_counter(
        &self,
        service: &str,
        key: &str,
        value: usize,
    ) -> GlbResult<usize>;

    /// Dump of every service and key
    async fn snapshot(&self) -> RegistrySnapshot;
}

/// Per-key state shared by the backings
#[derive(Debug, Clone)]
pub(crate) struct KeyEntry {
    pub(crate) name: String,
    pub(crate) cursor: usize,
    pub(crate) targets: Vec<Target>,
}

impl KeyEntry {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            cursor: 0,
            targets: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, target: Target, dedup: bool) {
        if dedup && self.targets.iter().any(|t| t.address == target.address) {
            return;
        }
        self.targets.push(target);
    }

    /// Single forward pass; returns how many targets were dropped
    pub(crate) fn remove(&mut self, address: &str) -> usize {
        let before = self.targets.len();
        self.targets.retain(|t| t.address != address);
        before - self.targets.len()
    }

    pub(crate) fn target_mut(&mut self, address: &str) -> Option<&mut Target> {
        self.targets.iter_mut().find(|t| t.address == address)
    }

    pub(crate) fn snapshot(&self) -> KeySnapshot {
        KeySnapshot {
            key: self.name.clone(),
            round_robin_cursor: self.cursor,
            targets: self.targets.clone(),
        }
    }
}

pub(crate) fn check_reserved(service: &str, key: &str) -> GlbResult<()> {
    if is_reserved(service) || is_reserved(key) {
        return Err(GlbError::service_not_found(service, key));
    }
    Ok(())
}

/// Create an empty registry of the configured representation
pub fn new_registry(backend: RegistryBackend, dedup: bool) -> Arc<dyn Registry> {
    match backend {
        RegistryBackend::Standard => Arc::new(StandardRegistry::with_dedup(dedup)),
        RegistryBackend::Map => Arc::new(MapRegistry::with_dedup(dedup)),
    }
}

/// Populate `registry` with repeated `add` calls, then validate it
pub async fn seed_registry(registry: &dyn Registry, seed: &RegistrySeed) -> GlbResult<()> {
    for (service, keys) in seed {
        for (key, addresses) in keys {
            for address in addresses {
                registry.add(service, key, Target::new(address.as_str())).await;
            }
            debug!(
                service = %service,
                key = %key,
                targets = addresses.len(),
                "Seeded key"
            );
        }
    }
    registry.validate().await
}

/// Build and seed a registry from configuration
pub async fn build_registry(config: &ProxyConfig) -> GlbResult<Arc<dyn Registry>> {
    let registry = new_registry(config.registry_backend, config.dedup_targets);
    seed_registry(registry.as_ref(), &config.registry).await?;

    info!(
        backend = ?config.registry_backend,
        services = config.registry.len(),
        "Registry built"
    );
    Ok(registry)
}
