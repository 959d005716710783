//! Subscription registry, delivery pipeline and the engine actor.
//!
//! This module owns the subscriber lifecycle: id allocation and lookup,
//! per-subscriber delivery tasks, and the command loop that serializes
//! subscribe/unsubscribe/publish and connection recovery.

pub mod delivery;
pub mod registry;

pub(crate) mod actor;

// Re-export commonly used types for convenience
pub use delivery::{DeliveryResult, SubscriberCallback};
pub use registry::{SubscriptionId, UnknownSubscriptionError};

// Re-export for internal crate usage only
pub(crate) use actor::{EngineHandle, PubSubActor};
