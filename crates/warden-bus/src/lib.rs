//! Warden Bus - typed publish/subscribe for agent events
//!
//! Agents and the registry publish lifecycle and decision events; observers
//! subscribe to a single kind or to everything. The bus keeps a bounded,
//! oldest-evicted-first history that can be queried per agent.
//!
//! # Example
//!
//! ```rust,ignore
//! use warden_bus::{AgentEvent, EventBus, EventKind, Topic};
//!
//! # async fn example() {
//! let bus = EventBus::new();
//! let sub = bus.subscribe_fn(Topic::All, |event| async move {
//!     println!("{} from {}", event.kind, event.agent);
//!     Ok(())
//! });
//!
//! bus.emit(AgentEvent::new(EventKind::AgentStarted, "monitoring")).await;
//! sub.unsubscribe();
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod bus;
pub mod event;

pub use bus::{EmitReport, EventBus, EventListener, Subscription, Topic, DEFAULT_HISTORY_CAPACITY};
pub use event::{AgentEvent, EventId, EventKind};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
