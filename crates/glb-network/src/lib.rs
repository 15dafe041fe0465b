//! glb-network: Registry, routing and load balancing
//!
//! This crate provides the request-path core of glb:
//! - Service registry (service -> key -> targets) with interchangeable backings
//! - Path routing to service/key
//! - Round-robin dialing with per-request failover
//! - A client connector that dials through the balancer

pub mod balancer;
pub mod connector;
pub mod registry;
pub mod router;

pub use balancer::LoadBalancer;
pub use connector::{parse_synthetic_host, synthetic_host, BalancedConnector};
pub use registry::{
    build_registry, new_registry, seed_registry, MapRegistry, Registry, StandardRegistry,
};
pub use router::{extract, route, Route};
