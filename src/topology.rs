//! Broker-side topology management.
//!
//! For every channel name the engine maintains one fanout publish exchange,
//! a dead-letter exchange/queue pair for poison messages, and one exclusive
//! auto-delete queue per subscriber, bound to the publish exchange and
//! dead-lettering into the channel's DLQ exchange.
//!
//! All declarations are idempotent; concurrent `ensure` calls for the same
//! channel name are serialized by the engine actor, which is the only
//! caller, so no two topology mutations for one name ever race.

use tracing::debug;

use crate::broker::{BrokerError, Channel, QueueDeclareOptions};
use crate::naming::{dlq_exchange_name, dlq_queue_name};
use crate::pubsub::error::TopologyError;

fn fail_for(channel: &str) -> impl Fn(BrokerError) -> TopologyError + Copy + '_ {
	move |source| TopologyError {
		channel: channel.to_owned(),
		source,
	}
}

/// Ensures the publish exchange for a channel exists.
///
/// The publish path calls this so that a publish to a channel nobody has
/// subscribed to yet is still addressable rather than a routing error.
pub async fn ensure_publish_exchange(
	channel: &dyn Channel,
	channel_name: &str,
) -> Result<(), TopologyError> {
	channel
		.declare_exchange(channel_name)
		.await
		.map_err(fail_for(channel_name))
}

/// Ensures the full topology for one subscriber on a channel and returns
/// the broker-generated name of its exclusive queue.
///
/// Shared pieces (publish exchange, DLQ exchange, DLQ queue and binding)
/// are declared idempotently, so subscribers on the same channel share
/// them; only the subscriber queue is per-caller.
pub async fn ensure_subscriber_topology(
	channel: &dyn Channel,
	channel_name: &str,
) -> Result<String, TopologyError> {
	let fail = fail_for(channel_name);

	channel.declare_exchange(channel_name).await.map_err(fail)?;

	let dlx = dlq_exchange_name(channel_name);
	let dlq = dlq_queue_name(channel_name);
	channel.declare_exchange(&dlx).await.map_err(fail)?;
	channel
		.declare_queue(&dlq, QueueDeclareOptions::default())
		.await
		.map_err(fail)?;
	channel.bind_queue(&dlq, &dlx).await.map_err(fail)?;

	let queue = channel
		.declare_queue(
			"",
			QueueDeclareOptions {
				exclusive: true,
				auto_delete: true,
				dead_letter_exchange: Some(dlx),
			},
		)
		.await
		.map_err(fail)?;
	channel.bind_queue(&queue, channel_name).await.map_err(fail)?;

	debug!(channel = %channel_name, queue = %queue, "subscriber topology ensured");
	Ok(queue)
}

/// Deletes one subscriber's exclusive queue.
///
/// Leaves the shared exchange and DLQ pair in place for the channel's
/// remaining subscribers.
pub async fn teardown_subscriber_queue(
	channel: &dyn Channel,
	channel_name: &str,
	queue: &str,
) -> Result<(), TopologyError> {
	channel
		.delete_queue(queue)
		.await
		.map_err(fail_for(channel_name))?;
	debug!(channel = %channel_name, queue = %queue, "subscriber queue deleted");
	Ok(())
}
