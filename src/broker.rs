//! Broker transport abstraction.
//!
//! The engine never talks to a wire protocol directly. It consumes the
//! broker through the [`ConnectionFactory`] / [`Connection`] / [`Channel`]
//! trait family, which covers exactly the capabilities it needs: declare,
//! bind and delete exchanges and queues, publish, consume, ack/reject.
//!
//! [`memory`] provides an always-available in-process implementation used
//! by the integration tests and as a brokerless development transport.

pub mod interface;
pub mod memory;

pub use interface::{
	BrokerError, BrokerMessage, Channel, Connection, ConnectionFactory,
	Consumer, QueueDeclareOptions,
};
pub use memory::{MemoryBroker, MemoryConnectionFactory};
