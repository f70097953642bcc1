//! Warden Registry
//!
//! Catalog of agent instances with bulk lifecycle orchestration and aggregate
//! health reporting. Lifecycle events are emitted on the shared bus.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod error;
pub mod registry;

pub use error::RegistryError;
pub use registry::{AgentRegistry, HealthReport, LifecycleReport};

/// Version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
