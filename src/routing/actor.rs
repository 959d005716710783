//! Engine actor: owns the broker link, the subscription registry and the
//! connection lifecycle state machine.
//!
//! All subscribe/unsubscribe/publish operations and reconnect recovery run
//! through one command loop, so registry access and topology mutations for
//! a given channel name are serialized by construction. Message delivery
//! itself happens in the per-subscriber tasks spawned by
//! [`delivery`](super::delivery) and proceeds concurrently across
//! subscribers.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tracing::{debug, error, info, warn};

use super::delivery::{self, SubscriberCallback};
use super::registry::{Subscription, SubscriptionId, SubscriptionRegistry};
use crate::broker::{BrokerError, Channel, Connection, ConnectionFactory};
use crate::codec::{encode_payload, Payload};
use crate::connection::PubSubConnection;
use crate::naming::{resolve_channel, ChannelOptions, TriggerTransform};
use crate::pubsub::config::EngineSettings;
use crate::pubsub::error::{ConnectionError, PubSubError, TopologyError};
use crate::topology;

/// A declare/bind that failed because the connection died is a connection
/// failure, not a broker rejection; keep the taxonomy honest.
fn topology_failure(err: TopologyError) -> PubSubError {
	if err.source == BrokerError::ConnectionClosed {
		ConnectionError::Broker(err.source).into()
	} else {
		err.into()
	}
}

pub(crate) enum Command {
	Subscribe {
		trigger: String,
		options: ChannelOptions,
		callback: SubscriberCallback,
		reply: oneshot::Sender<Result<SubscriptionId, PubSubError>>,
	},
	Unsubscribe {
		id: SubscriptionId,
		reply: oneshot::Sender<Result<(), PubSubError>>,
	},
	Publish {
		trigger: String,
		options: ChannelOptions,
		payload: Payload,
		reply: oneshot::Sender<Result<(), PubSubError>>,
	},
	ConnectionLost {
		epoch: u64,
	},
	ConnectionRestored {
		connection: Arc<dyn Connection>,
	},
	ReconnectGaveUp,
}

/// Lifecycle of the single broker link, owned exclusively by the actor.
enum LinkState {
	Connected {
		connection: Arc<dyn Connection>,
		channel: Arc<dyn Channel>,
	},
	Reconnecting,
	Disconnected,
}

pub(crate) struct PubSubActor {
	factory: Arc<dyn ConnectionFactory>,
	transform: TriggerTransform,
	settings: EngineSettings,
	registry: SubscriptionRegistry,
	state: LinkState,
	/// Counts connections; guards against stale close notifications.
	epoch: u64,
	command_rx: mpsc::Receiver<Command>,
	command_tx: mpsc::Sender<Command>,
	shutdown_rx: oneshot::Receiver<()>,
}

impl PubSubActor {
	pub fn spawn(
		factory: Arc<dyn ConnectionFactory>,
		connection: Arc<dyn Connection>,
		channel: Arc<dyn Channel>,
		transform: TriggerTransform,
		settings: EngineSettings,
	) -> (PubSubConnection, EngineHandle) {
		let (command_tx, command_rx) =
			mpsc::channel(settings.command_channel_capacity);
		let (shutdown_tx, shutdown_rx) = oneshot::channel();

		spawn_close_watcher(Arc::clone(&connection), 0, command_tx.clone());

		let actor = Self {
			factory,
			transform,
			settings,
			registry: SubscriptionRegistry::new(),
			state: LinkState::Connected {
				connection,
				channel,
			},
			epoch: 0,
			command_rx,
			command_tx: command_tx.clone(),
			shutdown_rx,
		};
		let join_handle = tokio::spawn(async move { actor.run().await });

		(
			PubSubConnection::new(shutdown_tx, join_handle),
			EngineHandle { command_tx },
		)
	}

	async fn run(mut self) {
		loop {
			tokio::select! {
				_ = &mut self.shutdown_rx => {
					info!("pub/sub engine: shutdown signal received");
					break;
				}
				cmd = self.command_rx.recv() => {
					match cmd {
						| Some(cmd) => self.handle_command(cmd).await,
						| None => {
							info!("pub/sub engine: command channel closed, exiting");
							break;
						}
					}
				}
			}
		}
		self.cleanup().await;
	}

	async fn handle_command(&mut self, cmd: Command) {
		match cmd {
			| Command::Subscribe {
				trigger,
				options,
				callback,
				reply,
			} => self.handle_subscribe(trigger, options, callback, reply).await,
			| Command::Unsubscribe { id, reply } => {
				self.handle_unsubscribe(id, reply).await
			}
			| Command::Publish {
				trigger,
				options,
				payload,
				reply,
			} => self.handle_publish(trigger, options, payload, reply).await,
			| Command::ConnectionLost { epoch } => {
				self.handle_connection_lost(epoch)
			}
			| Command::ConnectionRestored { connection } => {
				self.handle_connection_restored(connection).await
			}
			| Command::ReconnectGaveUp => {
				error!("reconnect attempts exhausted, engine is disconnected");
				self.state = LinkState::Disconnected;
			}
		}
	}

	async fn handle_subscribe(
		&mut self,
		trigger: String,
		options: ChannelOptions,
		callback: SubscriberCallback,
		reply: oneshot::Sender<Result<SubscriptionId, PubSubError>>,
	) {
		let channel_name =
			resolve_channel(&trigger, &options, &self.transform);
		let LinkState::Connected { channel, .. } = &self.state else {
			let _ = reply.send(Err(ConnectionError::NotConnected.into()));
			return;
		};
		let channel = Arc::clone(channel);

		// Provision-then-register: a failure here leaves nothing in the
		// registry.
		let queue = match topology::ensure_subscriber_topology(
			channel.as_ref(),
			&channel_name,
		)
		.await
		{
			| Ok(queue) => queue,
			| Err(err) => {
				error!(
					trigger = %trigger,
					channel = %channel_name,
					error = %err,
					"topology provisioning failed"
				);
				let _ = reply.send(Err(topology_failure(err)));
				return;
			}
		};
		let consumer = match channel.consume(&queue).await {
			| Ok(consumer) => consumer,
			| Err(err) => {
				if let Err(del_err) = channel.delete_queue(&queue).await {
					warn!(
						queue = %queue,
						error = %del_err,
						"failed to clean up queue after consume error"
					);
				}
				let _ =
					reply.send(Err(ConnectionError::Broker(err).into()));
				return;
			}
		};

		let id = self.registry.allocate_id();
		let (delivery_tx, delivery_rx) =
			mpsc::channel(self.settings.delivery_channel_capacity);
		let callback_task =
			delivery::spawn_callback_task(id, callback, delivery_rx);
		let consumer_task = delivery::spawn_consumer_task(
			id,
			Arc::clone(&channel),
			consumer,
			delivery_tx.clone(),
		);
		self.registry.insert(Subscription {
			id,
			trigger: trigger.clone(),
			options,
			channel_name: channel_name.clone(),
			queue_name: queue,
			delivery_tx,
			consumer_task,
			callback_task,
		});
		info!(
			subscription_id = %id,
			trigger = %trigger,
			channel = %channel_name,
			"subscription registered"
		);

		if reply.send(Ok(id)).is_err() {
			// Caller dropped the pending subscribe: treat as cancellation
			// of the subscription just made.
			warn!(
				subscription_id = %id,
				"subscribe caller went away, cancelling subscription"
			);
			if let Ok(subscription) = self.registry.remove(id) {
				self.teardown_subscription(subscription).await;
			}
		}
	}

	async fn handle_unsubscribe(
		&mut self,
		id: SubscriptionId,
		reply: oneshot::Sender<Result<(), PubSubError>>,
	) {
		match self.registry.remove(id) {
			| Ok(subscription) => {
				self.teardown_subscription(subscription).await;
				debug!(subscription_id = %id, "unsubscribed");
				let _ = reply.send(Ok(()));
			}
			| Err(err) => {
				warn!(subscription_id = %id, "unsubscribe of unknown id");
				let _ = reply.send(Err(err.into()));
			}
		}
	}

	/// Stops the consumer and deletes the subscriber queue. Dropping the
	/// subscription closes its delivery channel, which lets the callback
	/// task drain and finish.
	async fn teardown_subscription(&self, subscription: Subscription) {
		subscription.consumer_task.abort();
		if let LinkState::Connected { channel, .. } = &self.state {
			if let Err(err) = topology::teardown_subscriber_queue(
				channel.as_ref(),
				&subscription.channel_name,
				&subscription.queue_name,
			)
			.await
			{
				// Exclusive queues are deleted with the connection anyway.
				warn!(
					subscription_id = %subscription.id,
					queue = %subscription.queue_name,
					error = %err,
					"failed to delete subscriber queue"
				);
			}
		}
	}

	async fn handle_publish(
		&mut self,
		trigger: String,
		options: ChannelOptions,
		payload: Payload,
		reply: oneshot::Sender<Result<(), PubSubError>>,
	) {
		let channel_name =
			resolve_channel(&trigger, &options, &self.transform);
		let LinkState::Connected { channel, .. } = &self.state else {
			// Fail fast instead of queueing while disconnected.
			let _ = reply.send(Err(ConnectionError::NotConnected.into()));
			return;
		};

		let result: Result<(), PubSubError> = async {
			let bytes = encode_payload(&payload)?;
			topology::ensure_publish_exchange(channel.as_ref(), &channel_name)
				.await
				.map_err(topology_failure)?;
			channel
				.publish(&channel_name, bytes)
				.await
				.map_err(ConnectionError::Broker)?;
			Ok(())
		}
		.await;

		match &result {
			| Ok(()) => {
				debug!(trigger = %trigger, channel = %channel_name, "published")
			}
			| Err(err) => {
				error!(
					trigger = %trigger,
					channel = %channel_name,
					error = %err,
					"publish failed"
				)
			}
		}
		let _ = reply.send(result);
	}

	fn handle_connection_lost(&mut self, epoch: u64) {
		if epoch != self.epoch
			|| !matches!(self.state, LinkState::Connected { .. })
		{
			debug!(epoch, current = self.epoch, "stale connection-lost event");
			return;
		}
		warn!(
			epoch,
			subscriptions = self.registry.len(),
			"broker connection lost, entering reconnect"
		);
		self.state = LinkState::Reconnecting;
		// Registry entries are preserved for recovery; only the consumer
		// tasks die with the connection.
		for id in self.registry.ids() {
			if let Some(subscription) = self.registry.get_mut(id) {
				subscription.consumer_task.abort();
			}
		}
		self.begin_reconnect();
	}

	fn begin_reconnect(&self) {
		let factory = Arc::clone(&self.factory);
		let command_tx = self.command_tx.clone();
		let initial_delay = self.settings.reconnect_initial_delay;
		let max_delay = self.settings.reconnect_max_delay;
		let max_attempts = self.settings.reconnect_max_attempts;
		tokio::spawn(async move {
			let mut delay = initial_delay;
			for attempt in 1 ..= max_attempts {
				match factory.create().await {
					| Ok(connection) => {
						info!(attempt, "broker connection re-established");
						let _ = command_tx
							.send(Command::ConnectionRestored { connection })
							.await;
						return;
					}
					| Err(err) => {
						warn!(
							attempt,
							max_attempts,
							delay = ?delay,
							error = %err,
							"reconnect attempt failed"
						);
						time::sleep(delay).await;
						delay = (delay * 2).min(max_delay);
					}
				}
			}
			let _ = command_tx.send(Command::ReconnectGaveUp).await;
		});
	}

	async fn handle_connection_restored(
		&mut self,
		connection: Arc<dyn Connection>,
	) {
		let channel = match connection.create_channel().await {
			| Ok(channel) => channel,
			| Err(err) => {
				warn!(error = %err, "channel setup failed after reconnect, retrying");
				self.begin_reconnect();
				return;
			}
		};
		self.epoch += 1;
		spawn_close_watcher(
			Arc::clone(&connection),
			self.epoch,
			self.command_tx.clone(),
		);
		self.state = LinkState::Connected {
			connection,
			channel: Arc::clone(&channel),
		};

		// Re-provision topology and re-attach a consumer for every live
		// entry, in registration order. A failing entry is logged and
		// skipped so it cannot block the others.
		let mut recovered = 0usize;
		for id in self.registry.ids() {
			let Some(subscription) = self.registry.get(id) else {
				continue;
			};
			let channel_name = subscription.channel_name.clone();
			let delivery_tx = subscription.delivery_tx.clone();

			let queue = match topology::ensure_subscriber_topology(
				channel.as_ref(),
				&channel_name,
			)
			.await
			{
				| Ok(queue) => queue,
				| Err(err) => {
					error!(
						subscription_id = %id,
						channel = %channel_name,
						error = %err,
						"failed to recover topology for subscription"
					);
					continue;
				}
			};
			let consumer = match channel.consume(&queue).await {
				| Ok(consumer) => consumer,
				| Err(err) => {
					error!(
						subscription_id = %id,
						queue = %queue,
						error = %err,
						"failed to re-attach consumer for subscription"
					);
					continue;
				}
			};
			let consumer_task = delivery::spawn_consumer_task(
				id,
				Arc::clone(&channel),
				consumer,
				delivery_tx,
			);
			if let Some(subscription) = self.registry.get_mut(id) {
				subscription.queue_name = queue;
				let stale = std::mem::replace(
					&mut subscription.consumer_task,
					consumer_task,
				);
				stale.abort();
				recovered += 1;
			}
		}
		info!(
			epoch = self.epoch,
			recovered,
			total = self.registry.len(),
			"connection restored, subscriptions recovered"
		);
	}

	/// Shutdown path: stop consumers, delete subscriber queues
	/// best-effort, close the connection.
	async fn cleanup(&mut self) {
		let subscriptions: Vec<Subscription> = self.registry.drain().collect();
		for subscription in subscriptions {
			self.teardown_subscription(subscription).await;
		}
		if let LinkState::Connected { connection, .. } = &self.state {
			connection.close().await;
		}
		self.state = LinkState::Disconnected;
		info!("pub/sub engine stopped");
	}
}

fn spawn_close_watcher(
	connection: Arc<dyn Connection>,
	epoch: u64,
	command_tx: mpsc::Sender<Command>,
) {
	tokio::spawn(async move {
		connection.wait_closed().await;
		debug!(epoch, "broker connection closed");
		let _ = command_tx.send(Command::ConnectionLost { epoch }).await;
	});
}

/// Cheap cloneable handle sending commands to the engine actor.
#[derive(Clone)]
pub(crate) struct EngineHandle {
	command_tx: mpsc::Sender<Command>,
}

impl EngineHandle {
	pub async fn subscribe(
		&self,
		trigger: String,
		options: ChannelOptions,
		callback: SubscriberCallback,
	) -> Result<SubscriptionId, PubSubError> {
		let (reply_tx, reply_rx) = oneshot::channel();
		self.command_tx
			.send(Command::Subscribe {
				trigger,
				options,
				callback,
				reply: reply_tx,
			})
			.await
			.map_err(|_| PubSubError::EngineStopped)?;
		reply_rx.await.map_err(|_| PubSubError::ResponseLost)?
	}

	pub async fn unsubscribe(
		&self,
		id: SubscriptionId,
	) -> Result<(), PubSubError> {
		let (reply_tx, reply_rx) = oneshot::channel();
		self.command_tx
			.send(Command::Unsubscribe { id, reply: reply_tx })
			.await
			.map_err(|_| PubSubError::EngineStopped)?;
		reply_rx.await.map_err(|_| PubSubError::ResponseLost)?
	}

	pub async fn publish(
		&self,
		trigger: String,
		options: ChannelOptions,
		payload: Payload,
	) -> Result<(), PubSubError> {
		let (reply_tx, reply_rx) = oneshot::channel();
		self.command_tx
			.send(Command::Publish {
				trigger,
				options,
				payload,
				reply: reply_tx,
			})
			.await
			.map_err(|_| PubSubError::EngineStopped)?;
		reply_rx.await.map_err(|_| PubSubError::ResponseLost)?
	}
}
