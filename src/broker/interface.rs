//! Capability traits the engine requires from a broker client.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Errors surfaced by broker operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
	/// Publish or bind addressed an exchange that does not exist.
	#[error("exchange '{0}' does not exist")]
	ExchangeNotFound(String),
	/// Consume, bind or delete addressed a queue that does not exist.
	#[error("queue '{0}' does not exist")]
	QueueNotFound(String),
	/// The broker rejected a declaration, e.g. an incompatible existing one.
	#[error("declaration of '{name}' rejected: {reason}")]
	DeclareRejected {
		/// Name of the exchange or queue being declared.
		name: String,
		/// Broker-supplied rejection reason.
		reason: String,
	},
	/// Ack/reject referenced a delivery tag the broker does not know.
	#[error("unknown delivery tag {0}")]
	UnknownDeliveryTag(u64),
	/// The underlying connection is closed.
	#[error("broker connection is closed")]
	ConnectionClosed,
}

/// A raw message handed to a consumer.
#[derive(Debug, Clone)]
pub struct BrokerMessage {
	/// Broker-assigned tag identifying this delivery for ack/reject.
	pub delivery_tag: u64,
	/// Message body bytes.
	pub payload: Bytes,
}

/// Options for queue declaration.
#[derive(Debug, Clone, Default)]
pub struct QueueDeclareOptions {
	/// Queue is owned by the declaring connection and dies with it.
	pub exclusive: bool,
	/// Queue is deleted once its last consumer goes away.
	pub auto_delete: bool,
	/// Exchange rejected messages are dead-lettered to.
	pub dead_letter_exchange: Option<String>,
}

/// A stream of deliveries from one queue.
#[async_trait]
pub trait Consumer: Send {
	/// Next delivery; `None` once the queue or connection is gone.
	async fn next(&mut self) -> Option<BrokerMessage>;
}

/// One multiplexed channel on a broker connection.
#[async_trait]
pub trait Channel: Send + Sync {
	/// Declares a fanout exchange. Redeclaring an existing one is a no-op.
	async fn declare_exchange(&self, name: &str) -> Result<(), BrokerError>;

	/// Deletes an exchange and all its bindings.
	async fn delete_exchange(&self, name: &str) -> Result<(), BrokerError>;

	/// Declares a queue. An empty `name` asks the broker to generate one;
	/// the actual queue name is returned either way.
	async fn declare_queue(
		&self,
		name: &str,
		options: QueueDeclareOptions,
	) -> Result<String, BrokerError>;

	/// Deletes a queue and drops its pending messages.
	async fn delete_queue(&self, name: &str) -> Result<(), BrokerError>;

	/// Binds `queue` to `exchange` so publishes fan out to it.
	async fn bind_queue(
		&self,
		queue: &str,
		exchange: &str,
	) -> Result<(), BrokerError>;

	/// Fans a message out to every queue bound to `exchange`.
	async fn publish(
		&self,
		exchange: &str,
		payload: Bytes,
	) -> Result<(), BrokerError>;

	/// Starts consuming from `queue`.
	async fn consume(
		&self,
		queue: &str,
	) -> Result<Box<dyn Consumer>, BrokerError>;

	/// Positively acknowledges one delivery.
	async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError>;

	/// Rejects one delivery. With `requeue == false` the message is routed
	/// to the queue's dead-letter exchange, if configured.
	async fn reject(
		&self,
		delivery_tag: u64,
		requeue: bool,
	) -> Result<(), BrokerError>;
}

/// One logical broker connection.
#[async_trait]
pub trait Connection: Send + Sync {
	/// Opens a channel multiplexed over this connection.
	async fn create_channel(&self) -> Result<Arc<dyn Channel>, BrokerError>;

	/// Resolves once the connection has closed, for any reason.
	async fn wait_closed(&self);

	/// Closes the connection. Idempotent.
	async fn close(&self);
}

/// Creates broker connections; the engine calls this at startup and on
/// every reconnect attempt.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
	/// Opens a fresh connection to the broker.
	async fn create(&self) -> Result<Arc<dyn Connection>, BrokerError>;
}
