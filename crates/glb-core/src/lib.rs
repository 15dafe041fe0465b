//! glb-core: Core types for the glb load balancer
//!
//! This crate provides the fundamental types used throughout glb:
//! - Targets and registry dumps
//! - Configuration types
//! - Error handling

pub mod config;
pub mod error;
pub mod model;

pub use config::*;
pub use error::*;
pub use model::*;
