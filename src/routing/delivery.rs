//! Per-subscriber delivery pipeline.
//!
//! Two tasks per subscriber. The consumer task reads raw broker messages,
//! decodes them, settles each delivery with the broker exactly once (ack
//! after a successful decode, reject-to-DLQ on a decode failure) and
//! forwards the outcome into the subscriber's bounded channel. The
//! callback task drains that channel sequentially and invokes the
//! callback, so callbacks for one subscriber never overlap and a panicking
//! callback takes down only its own task.
//!
//! Acknowledgment happens immediately after decode, before the callback
//! sees the message: a delivery reaches a given callback at most once even
//! when the broker redelivers around a reconnect.

use std::sync::Arc;

use tokio::sync::mpsc::{Receiver, Sender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::registry::SubscriptionId;
use crate::broker::{Channel, Consumer};
use crate::codec::{decode_payload, Payload, PayloadDecodeError};

/// Outcome of decoding one delivered message.
pub type DeliveryResult = Result<Payload, PayloadDecodeError>;

/// Subscriber callback, the `(error, payload)` contract as a `Result`.
///
/// Invoked sequentially per subscriber, in arrival order. Fire-and-forget
/// relative to broker acknowledgment; whatever the callback does with the
/// outcome, including panicking, is its owner's responsibility.
pub type SubscriberCallback = Box<dyn FnMut(DeliveryResult) + Send + 'static>;

/// Spawns the consumer task for one subscriber on the current connection.
///
/// Ends when the consumer stream closes (queue deleted or connection lost)
/// or when the subscriber's delivery channel is dropped by unsubscribe.
pub(crate) fn spawn_consumer_task(
	id: SubscriptionId,
	channel: Arc<dyn Channel>,
	mut consumer: Box<dyn Consumer>,
	delivery_tx: Sender<DeliveryResult>,
) -> JoinHandle<()> {
	tokio::spawn(async move {
		while let Some(message) = consumer.next().await {
			let outcome = match decode_payload(&message.payload) {
				| Ok(payload) => {
					if let Err(err) = channel.ack(message.delivery_tag).await {
						warn!(
							subscription_id = %id,
							delivery_tag = message.delivery_tag,
							error = %err,
							"failed to ack delivery"
						);
					}
					Ok(payload)
				}
				| Err(decode_err) => {
					// Data problem, not a transport problem: settle the
					// message so it dead-letters instead of redelivering,
					// and report to this subscriber only.
					if let Err(err) =
						channel.reject(message.delivery_tag, false).await
					{
						warn!(
							subscription_id = %id,
							delivery_tag = message.delivery_tag,
							error = %err,
							"failed to reject undecodable delivery"
						);
					}
					Err(decode_err)
				}
			};
			if delivery_tx.send(outcome).await.is_err() {
				debug!(
					subscription_id = %id,
					"subscriber channel closed, stopping consumer task"
				);
				return;
			}
		}
		debug!(subscription_id = %id, "consumer stream ended");
	})
}

/// Spawns the long-lived callback task for one subscriber.
///
/// Outlives individual consumer tasks; it exits once every sender clone
/// has been dropped, i.e. after unsubscribe or engine shutdown.
pub(crate) fn spawn_callback_task(
	id: SubscriptionId,
	mut callback: SubscriberCallback,
	mut delivery_rx: Receiver<DeliveryResult>,
) -> JoinHandle<()> {
	tokio::spawn(async move {
		while let Some(result) = delivery_rx.recv().await {
			callback(result);
		}
		debug!(subscription_id = %id, "callback task finished");
	})
}
