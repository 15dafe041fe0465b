//! Round-robin dialing with per-request failover

use glb_core::{GlbError, GlbResult, Target};
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, error, warn};

use crate::registry::Registry;

/// Dials targets of a service/key in round-robin order
///
/// Failed candidates get their failure counter bumped and are dropped from
/// this request's working copy only; the registry keeps them, so the next
/// request tries them again. The cursor advances only when a connection
/// succeeds. Reading the cursor, looking up and writing the cursor back are
/// separate lock acquisitions, so concurrent requests may pick the same
/// target.
#[derive(Debug, Clone)]
pub struct LoadBalancer {
    /// Connect timeout for a single candidate
    dial_timeout: Duration,
}

impl LoadBalancer {
    /// Create a new load balancer
    pub fn new(dial_timeout: Duration) -> Self {
        Self { dial_timeout }
    }

    /// Connect to one of the targets registered for service/key
    pub async fn dial(
        &self,
        service: &str,
        key: &str,
        registry: &dyn Registry,
    ) -> GlbResult<TcpStream> {
        let cursor = registry.round_robin_counter(service, key).await?;
        let targets = registry.lookup(service, key).await?;

        // (index in the lookup snapshot, target)
        let mut candidates: Vec<(usize, Target)> = targets.into_iter().enumerate().collect();
        let mut position = cursor;

        loop {
            if candidates.is_empty() {
                error!(service = %service, key = %key, "No endpoint available");
                return Err(GlbError::no_endpoint_available(service, key));
            }
            if position >= candidates.len() {
                position = 0;
            }

            let (index, target) = &candidates[position];
            match self.connect(&target.address).await {
                Ok(stream) => {
                    debug!(
                        service = %service,
                        key = %key,
                        address = %target.address,
                        selected_index = *index,
                        "Selected endpoint"
                    );
                    if let Err(e) = registry
                        .set_round_robin_counter(service, key, index + 1)
                        .await
                    {
                        warn!(
                            service = %service,
                            key = %key,
                            error = %e,
                            "Failed to advance round-robin cursor"
                        );
                    }
                    return Ok(stream);
                }
                Err(e) => {
                    warn!(
                        service = %service,
                        key = %key,
                        address = %target.address,
                        error = %e,
                        "Could not reach endpoint"
                    );
                    if let Err(e) = registry
                        .increment_failures(service, key, &target.address, 1)
                        .await
                    {
                        warn!(
                            service = %service,
                            key = %key,
                            address = %target.address,
                            error = %e,
                            "Failed to record endpoint failure"
                        );
                    }
                    candidates.remove(position);
                }
            }
        }
    }

    async fn connect(&self, address: &str) -> io::Result<TcpStream> {
        let stream = tokio::time::timeout(self.dial_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    /// Get the per-candidate connect timeout
    pub fn dial_timeout(&self) -> Duration {
        self.dial_timeout
    }
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StandardRegistry;
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    async fn live() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        (listener, address)
    }

    async fn dead() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().to_string()
    }

    fn peer(stream: &TcpStream) -> String {
        stream.peer_addr().unwrap().to_string()
    }

    async fn failures(registry: &dyn Registry, address: &str) -> u64 {
        registry
            .lookup("svc1", "v1")
            .await
            .unwrap()
            .into_iter()
            .find(|t| t.address == address)
            .map(|t| t.failures)
            .unwrap()
    }

    #[tokio::test]
    async fn test_failover_to_reachable() {
        let registry = StandardRegistry::new();
        let a = dead().await;
        let (_b_listener, b) = live().await;
        registry.add("svc1", "v1", Target::new(a.as_str())).await;
        registry.add("svc1", "v1", Target::new(b.as_str())).await;

        let lb = LoadBalancer::new(Duration::from_secs(2));
        let stream = lb.dial("svc1", "v1", &registry).await.unwrap();

        assert_eq!(peer(&stream), b);
        assert_eq!(failures(&registry, &a).await, 1);
        assert_eq!(failures(&registry, &b).await, 0);
        // eviction is per request; ground truth keeps both
        assert_eq!(registry.lookup("svc1", "v1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_all_unreachable() {
        let registry = StandardRegistry::new();
        let addresses = [dead().await, dead().await, dead().await];
        for address in &addresses {
            registry.add("svc1", "v1", Target::new(address.as_str())).await;
        }

        let lb = LoadBalancer::new(Duration::from_secs(2));
        let err = lb.dial("svc1", "v1", &registry).await.unwrap_err();

        assert!(matches!(err, GlbError::NoEndpointAvailable { .. }));
        for address in &addresses {
            assert_eq!(failures(&registry, address).await, 1);
        }
        assert_eq!(registry.round_robin_counter("svc1", "v1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_key() {
        let registry = StandardRegistry::new();
        let lb = LoadBalancer::default();

        assert!(matches!(
            lb.dial("svc1", "v1", &registry).await,
            Err(GlbError::ServiceNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_round_robin_rotation() {
        let registry = StandardRegistry::new();
        let mut listeners = Vec::new();
        let mut addresses = Vec::new();
        for _ in 0..3 {
            let (listener, address) = live().await;
            registry.add("svc1", "v1", Target::new(address.as_str())).await;
            listeners.push(listener);
            addresses.push(address);
        }

        let lb = LoadBalancer::default();
        let mut seen = Vec::new();
        for _ in 0..6 {
            let stream = lb.dial("svc1", "v1", &registry).await.unwrap();
            seen.push(peer(&stream));
        }

        let expected: Vec<String> = addresses.iter().chain(addresses.iter()).cloned().collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_cursor_advances_only_on_success() {
        let registry = StandardRegistry::new();
        let a = dead().await;
        let (_b_listener, b) = live().await;
        let (_c_listener, c) = live().await;
        for address in [&a, &b, &c] {
            registry.add("svc1", "v1", Target::new(address.as_str())).await;
        }
        let lb = LoadBalancer::default();

        // a fails, b succeeds: cursor lands past b's snapshot index
        let stream = lb.dial("svc1", "v1", &registry).await.unwrap();
        assert_eq!(peer(&stream), b);
        assert_eq!(registry.round_robin_counter("svc1", "v1").await.unwrap(), 2);

        let stream = lb.dial("svc1", "v1", &registry).await.unwrap();
        assert_eq!(peer(&stream), c);
        assert_eq!(registry.round_robin_counter("svc1", "v1").await.unwrap(), 3);

        // cursor wraps lazily; a is retried and fails again
        let stream = lb.dial("svc1", "v1", &registry).await.unwrap();
        assert_eq!(peer(&stream), b);
        assert_eq!(failures(&registry, &a).await, 2);
    }

    #[tokio::test]
    async fn test_cursor_is_per_key() {
        let registry = StandardRegistry::new();
        let (_l1, a) = live().await;
        let (_l2, b) = live().await;
        registry.add("svc1", "v1", Target::new(a.as_str())).await;
        registry.add("svc1", "v1", Target::new(b.as_str())).await;
        registry.add("svc2", "v1", Target::new(a.as_str())).await;
        registry.add("svc2", "v1", Target::new(b.as_str())).await;

        let lb = LoadBalancer::default();
        lb.dial("svc1", "v1", &registry).await.unwrap();
        lb.dial("svc1", "v1", &registry).await.unwrap();

        let stream = lb.dial("svc2", "v1", &registry).await.unwrap();
        assert_eq!(peer(&stream), a);
    }

    #[tokio::test]
    async fn test_concurrent_dials() {
        let registry = Arc::new(StandardRegistry::new());
        let mut listeners = Vec::new();
        let mut addresses = Vec::new();
        for _ in 0..3 {
            let (listener, address) = live().await;
            registry.add("svc1", "v1", Target::new(address.as_str())).await;
            listeners.push(listener);
            addresses.push(address);
        }
        let lb = LoadBalancer::default();

        // dials within a wave race on the cursor; waves observe each other's advance
        let mut hits: HashMap<String, usize> = HashMap::new();
        for _ in 0..6 {
            let mut handles = Vec::new();
            for _ in 0..5 {
                let registry = registry.clone();
                let lb = lb.clone();
                handles.push(tokio::spawn(async move {
                    let stream = lb.dial("svc1", "v1", registry.as_ref()).await.unwrap();
                    stream.peer_addr().unwrap()
                }));
            }
            for handle in handles {
                let peer: SocketAddr = handle.await.unwrap();
                *hits.entry(peer.to_string()).or_default() += 1;
            }
        }

        assert_eq!(hits.values().sum::<usize>(), 30);
        for address in &addresses {
            assert!(
                hits.get(address).copied().unwrap_or_default() > 0,
                "{} never selected: {:?}",
                address,
                hits
            );
        }
        let cursor = registry.round_robin_counter("svc1", "v1").await.unwrap();
        assert!((1..=3).contains(&cursor));
    }
}
