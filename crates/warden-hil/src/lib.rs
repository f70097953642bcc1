//! Warden HIL
//!
//! Human-in-the-loop escalation engine. [`HilEngine`] implements
//! [`warden_core::HilBroker`] and is shared by every agent that escalates.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod engine;

pub use engine::{HilEngine, HilStats, PendingSummary};

/// Version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
