//! Public pub/sub engine facade.

use std::sync::Arc;

use tracing::info;

use super::config::PubSubConfig;
use super::error::{ConnectionError, PubSubError};
use crate::broker::ConnectionFactory;
use crate::codec::Payload;
use crate::connection::PubSubConnection;
use crate::naming::ChannelOptions;
use crate::routing::{
	EngineHandle, PubSubActor, SubscriberCallback, SubscriptionId,
};

/// GraphQL-style pub/sub engine over an AMQP-like broker.
///
/// Cheap to clone; all clones talk to the same engine actor. The paired
/// [`PubSubConnection`] owns the engine's lifetime and must be shut down
/// explicitly.
#[derive(Clone)]
pub struct AmqpPubSub {
	handle: EngineHandle,
}

impl AmqpPubSub {
	/// Connects to the broker and starts the engine.
	pub async fn connect(
		factory: Arc<dyn ConnectionFactory>,
		config: PubSubConfig,
	) -> Result<(Self, PubSubConnection), PubSubError> {
		let connection = factory
			.create()
			.await
			.map_err(ConnectionError::Broker)?;
		let channel = connection
			.create_channel()
			.await
			.map_err(ConnectionError::Broker)?;
		info!("pub/sub engine connected to broker");

		let (controller, handle) = PubSubActor::spawn(
			factory,
			connection,
			channel,
			config.trigger_transform,
			config.settings,
		);
		Ok((Self { handle }, controller))
	}

	/// Subscribes `callback` to a trigger with default (empty) channel
	/// options.
	pub async fn subscribe(
		&self,
		trigger: impl Into<String>,
		callback: SubscriberCallback,
	) -> Result<SubscriptionId, PubSubError> {
		self.subscribe_with_options(
			trigger,
			ChannelOptions::default(),
			callback,
		)
		.await
	}

	/// Subscribes `callback` to the channel resolved from a trigger and
	/// its options.
	///
	/// Provisions the channel's exchange, dead-letter pair and a dedicated
	/// exclusive queue before registering; on provisioning failure nothing
	/// is registered and the error is returned.
	pub async fn subscribe_with_options(
		&self,
		trigger: impl Into<String>,
		options: ChannelOptions,
		callback: SubscriberCallback,
	) -> Result<SubscriptionId, PubSubError> {
		self.handle.subscribe(trigger.into(), options, callback).await
	}

	/// Removes a subscription and tears down its queue.
	///
	/// An id that was never issued or is already removed fails with
	/// [`UnknownSubscriptionError`](crate::routing::UnknownSubscriptionError);
	/// unsubscribing twice is a bug, never a no-op.
	pub async fn unsubscribe(
		&self,
		id: SubscriptionId,
	) -> Result<(), PubSubError> {
		self.handle.unsubscribe(id).await
	}

	/// Publishes a payload under a trigger with default channel options.
	pub async fn publish(
		&self,
		trigger: impl Into<String>,
		payload: impl Into<Payload>,
	) -> Result<(), PubSubError> {
		self.publish_with_options(trigger, ChannelOptions::default(), payload)
			.await
	}

	/// Publishes to the channel resolved from a trigger and options.
	///
	/// The channel name is resolved exactly as on the subscribe side; a
	/// transform mismatch between the two sides is a configuration error
	/// the engine cannot detect. Fails fast while disconnected.
	pub async fn publish_with_options(
		&self,
		trigger: impl Into<String>,
		options: ChannelOptions,
		payload: impl Into<Payload>,
	) -> Result<(), PubSubError> {
		self.handle
			.publish(trigger.into(), options, payload.into())
			.await
	}
}
