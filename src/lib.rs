//! # AMQP Pub/Sub
//!
//! A GraphQL-style publish/subscribe engine bridging named triggers to
//! message-broker topology, with per-subscriber failure isolation and
//! automatic recovery across reconnects.
//!
//! ## Features
//!
//! - **Trigger-to-topology mapping**: a trigger plus channel options
//!   resolves to a broker channel name backing one fanout exchange
//! - **Per-subscriber queues**: every subscription gets its own exclusive
//!   auto-delete queue bound to the channel's exchange
//! - **Dead-letter routing**: undecodable messages land in a per-channel
//!   DLQ instead of being dropped or redelivered forever
//! - **Failure isolation**: decode errors and callback panics stay with
//!   the subscriber that owns them
//! - **Reconnect recovery**: topology and consumers are rebuilt for every
//!   live subscription when the connection comes back
//! - **Transport-agnostic**: the broker is consumed through a small trait
//!   family; an in-process broker ships for tests and development
//!
//! ## Quick Start
//!
//! ```rust
//! use amqp_pubsub::{AmqpPubSub, MemoryBroker, Payload, PubSubConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let broker = MemoryBroker::new();
//!     let (pubsub, connection) =
//!         AmqpPubSub::connect(broker.factory(), PubSubConfig::default())
//!             .await?;
//!
//!     let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//!     let id = pubsub
//!         .subscribe("Trigger1", Box::new(move |result| {
//!             let _ = tx.send(result);
//!         }))
//!         .await?;
//!
//!     pubsub.publish("Trigger1", "good").await?;
//!     assert_eq!(rx.recv().await.unwrap()?, Payload::from("good"));
//!
//!     pubsub.unsubscribe(id).await?;
//!     connection.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Channel options
//!
//! Channel options narrow a trigger to a specific routing path. With the
//! default transform, subscribing to `"comments"` with path
//! `["some-repo"]` listens on the channel `comments.some-repo`; a publish
//! must target the same channel name to reach that subscriber, so both
//! sides have to agree on the transform.
//!
//! ## Delivery contract
//!
//! Each delivered message is decoded (JSON, falling back to raw string)
//! and handed to the subscriber's callback at most once, in arrival
//! order. Decode failures are reported to that callback as the error case
//! and the message is dead-lettered; they never affect other subscribers.

#![warn(missing_docs)]

// Core modules
pub mod broker;
pub mod codec;
pub mod connection;
pub mod naming;
pub mod pubsub;
pub mod routing;
pub mod topology;

// === Core Public API ===
// Main engine types
pub use connection::PubSubConnection;
pub use pubsub::{AmqpPubSub, EngineSettings, PubSubConfig, PubSubError};

// Naming and wire format
pub use codec::{Payload, PayloadDecodeError};
pub use naming::{default_transform, ChannelOptions, TriggerTransform};

// Subscriber contract
pub use routing::{DeliveryResult, SubscriberCallback, SubscriptionId};

// Broker abstraction and the in-process implementation
pub use broker::{
	BrokerError, Channel, Connection, ConnectionFactory, MemoryBroker,
};

/// Result type alias for operations that may fail with [`PubSubError`]
pub type Result<T> = std::result::Result<T, PubSubError>;

/// Prelude module for convenient imports
///
/// ```rust
/// use amqp_pubsub::prelude::*;
/// ```
pub mod prelude {
	//! Essential types for most pub/sub applications

	pub use crate::{
		AmqpPubSub, ChannelOptions, Payload, PubSubConfig, PubSubConnection,
		PubSubError, Result, SubscriptionId,
	};
}

/// Error types used throughout the library
///
/// Re-exports all error types in one convenient location for error
/// handling.
pub mod errors {
	//! All error types used in the library

	pub use crate::broker::BrokerError;
	pub use crate::codec::PayloadDecodeError;
	pub use crate::pubsub::{ConnectionError, PubSubError, TopologyError};
	pub use crate::routing::UnknownSubscriptionError;
}
