//! Pub/sub engine module
//!
//! This module provides the high-level engine API: the [`AmqpPubSub`]
//! facade, its configuration and the error taxonomy.

/// Engine configuration
pub mod config;
/// Engine facade implementation
pub mod engine;
/// Engine error taxonomy
pub mod error;

// Re-export commonly used types for convenience
pub use config::{EngineSettings, PubSubConfig};
pub use engine::AmqpPubSub;
pub use error::{ConnectionError, PubSubError, TopologyError};

// Connection controller type is available from the root level
// Use: amqp_pubsub::PubSubConnection
