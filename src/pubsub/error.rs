//! Engine error taxonomy.
//!
//! Errors local to one subscriber's delivery
//! ([`PayloadDecodeError`](crate::codec::PayloadDecodeError)) are reported
//! through that subscriber's callback and never appear here; `PubSubError`
//! covers the failures surfaced to `subscribe`/`unsubscribe`/`publish`
//! callers.

use thiserror::Error;

use crate::broker::BrokerError;
use crate::routing::UnknownSubscriptionError;

/// The broker rejected an exchange/queue declaration or binding.
///
/// Surfaced to the `subscribe` or `publish` caller that triggered the
/// provisioning; the subscription is not registered (provision-then-
/// register ordering leaves no partial state behind).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("topology setup failed for channel '{channel}': {source}")]
pub struct TopologyError {
	/// The channel whose topology was being provisioned.
	pub channel: String,
	/// The underlying broker rejection.
	#[source]
	pub source: BrokerError,
}

/// Connection-level failures.
///
/// Transitioning to disconnected fails in-flight publishes; existing
/// subscriptions are preserved and recovered on reconnect rather than
/// reported to their owners.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
	/// An operation requiring a live connection arrived while the engine
	/// was disconnected or reconnecting. The engine fails fast rather than
	/// queueing.
	#[error("not connected to broker")]
	NotConnected,
	/// The broker reported a failure on a connected operation.
	#[error("broker operation failed: {0}")]
	Broker(#[from] BrokerError),
}

/// Errors returned by the public engine operations.
#[derive(Debug, Error)]
pub enum PubSubError {
	/// Topology provisioning failed.
	#[error(transparent)]
	Topology(#[from] TopologyError),

	/// Unsubscribe addressed an id that was never issued or is gone.
	#[error(transparent)]
	UnknownSubscription(#[from] UnknownSubscriptionError),

	/// The broker connection is down or an operation on it failed.
	#[error(transparent)]
	Connection(#[from] ConnectionError),

	/// A structured payload could not be JSON-encoded for the wire.
	#[error("payload serialization failed: {0}")]
	Serialization(#[from] serde_json::Error),

	/// The engine actor is no longer running.
	#[error("pub/sub engine stopped")]
	EngineStopped,

	/// The engine dropped the reply channel before answering.
	#[error("pub/sub engine response lost")]
	ResponseLost,
}
