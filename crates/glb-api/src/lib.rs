//! glb-api: HTTP surface for glb
//!
//! This crate provides the axum application served by the daemon:
//! - Reverse-proxy handler for every non-reserved path
//! - Registry status and configuration reload
//! - HTTP to HTTPS redirect
//! - The reloadable runtime shared by all of the above

pub mod proxy;
pub mod rest;
pub mod state;

pub use proxy::proxy_handler;
pub use rest::{create_redirect_router, create_router};
pub use state::{ProxyState, Runtime};
