//! In-process broker implementing the transport traits.
//!
//! Fanout-only: a publish to an exchange reaches every bound queue.
//! Deliveries are tracked per tag until acked or rejected, rejected
//! messages follow the queue's dead-letter exchange, and exclusive queues
//! die with the connection that declared them. Connection drops can be
//! injected with [`MemoryBroker::drop_connections`], which is how the
//! integration tests exercise the reconnect path.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use super::interface::{
	BrokerError, BrokerMessage, Channel, Connection, ConnectionFactory,
	Consumer, QueueDeclareOptions,
};

/// Shared in-process broker state.
#[derive(Clone, Default)]
pub struct MemoryBroker {
	state: Arc<Mutex<BrokerState>>,
}

#[derive(Default)]
struct BrokerState {
	/// Exchange name -> names of bound queues.
	exchanges: HashMap<String, Vec<String>>,
	queues: HashMap<String, QueueState>,
	/// Delivered but not yet acked/rejected messages, by delivery tag.
	unacked: HashMap<u64, UnackedDelivery>,
	/// Live connections by epoch; the sender flips to `true` on close.
	live: HashMap<u64, watch::Sender<bool>>,
	/// When set, new connection attempts are refused. Simulates a broker
	/// outage window for reconnect tests.
	refuse_connections: bool,
	/// When set, exchange/queue declarations are rejected with this
	/// reason. Simulates an incompatible existing declaration.
	declare_rejection: Option<String>,
	next_tag: u64,
	next_generated: u64,
	next_epoch: u64,
}

struct QueueState {
	/// Messages waiting for a consumer.
	ready: VecDeque<Bytes>,
	consumer: Option<mpsc::UnboundedSender<BrokerMessage>>,
	dead_letter_exchange: Option<String>,
	exclusive: bool,
	/// Epoch of the declaring connection, for exclusive queues.
	owner: Option<u64>,
}

struct UnackedDelivery {
	queue: String,
	payload: Bytes,
}

impl MemoryBroker {
	/// An empty broker with no exchanges or queues.
	pub fn new() -> Self {
		Self::default()
	}

	/// A factory producing connections to this broker.
	pub fn factory(&self) -> Arc<MemoryConnectionFactory> {
		Arc::new(MemoryConnectionFactory {
			broker: self.clone(),
		})
	}

	/// Force-closes every live connection, as an unexpected network drop
	/// would. Exclusive queues owned by the dropped connections are
	/// deleted; exchanges and shared queues survive.
	pub fn drop_connections(&self) {
		let mut state = self.state.lock().expect("broker state poisoned");
		let epochs: Vec<u64> = state.live.keys().copied().collect();
		for epoch in epochs {
			state.close_epoch(epoch);
		}
	}

	/// Refuses (or allows again) new connection attempts.
	pub fn set_refuse_connections(&self, refuse: bool) {
		let mut state = self.state.lock().expect("broker state poisoned");
		state.refuse_connections = refuse;
	}

	/// Rejects subsequent exchange/queue declarations with `reason`, as a
	/// broker would for an incompatible existing declaration. `None`
	/// accepts declarations again.
	pub fn set_declare_rejection(&self, reason: Option<&str>) {
		let mut state = self.state.lock().expect("broker state poisoned");
		state.declare_rejection = reason.map(str::to_owned);
	}

	/// Number of messages sitting ready in `queue`, if it exists.
	pub fn queue_depth(&self, queue: &str) -> Option<usize> {
		let state = self.state.lock().expect("broker state poisoned");
		state.queues.get(queue).map(|q| q.ready.len())
	}

	/// Whether an exchange with `name` has been declared.
	pub fn has_exchange(&self, name: &str) -> bool {
		let state = self.state.lock().expect("broker state poisoned");
		state.exchanges.contains_key(name)
	}
}

impl BrokerState {
	fn close_epoch(&mut self, epoch: u64) {
		if let Some(closed) = self.live.remove(&epoch) {
			let _ = closed.send(true);
		}
		let orphaned: Vec<String> = self
			.queues
			.iter()
			.filter(|(_, q)| q.exclusive && q.owner == Some(epoch))
			.map(|(name, _)| name.clone())
			.collect();
		for queue in orphaned {
			debug!(queue = %queue, epoch, "dropping exclusive queue with its connection");
			self.remove_queue(&queue);
		}
	}

	fn remove_queue(&mut self, name: &str) {
		// Dropping the queue drops its consumer sender, which ends the
		// consumer stream on the engine side.
		self.queues.remove(name);
		for bound in self.exchanges.values_mut() {
			bound.retain(|q| q != name);
		}
		self.unacked.retain(|_, d| d.queue != name);
	}

	fn deliver(&mut self, queue_name: &str, payload: Bytes) {
		let Some(queue) = self.queues.get_mut(queue_name) else {
			return;
		};
		if let Some(sender) = queue.consumer.clone() {
			let delivery_tag = self.next_tag;
			self.next_tag += 1;
			let message = BrokerMessage {
				delivery_tag,
				payload: payload.clone(),
			};
			if sender.send(message).is_ok() {
				self.unacked.insert(
					delivery_tag,
					UnackedDelivery {
						queue: queue_name.to_owned(),
						payload,
					},
				);
				return;
			}
			// Consumer receiver is gone; fall through to buffering.
			if let Some(queue) = self.queues.get_mut(queue_name) {
				queue.consumer = None;
			}
		}
		if let Some(queue) = self.queues.get_mut(queue_name) {
			queue.ready.push_back(payload);
		}
	}

	fn route(&mut self, exchange: &str, payload: Bytes) -> Result<(), BrokerError> {
		let Some(bound) = self.exchanges.get(exchange) else {
			return Err(BrokerError::ExchangeNotFound(exchange.to_owned()));
		};
		let targets: Vec<String> = bound.clone();
		for queue in targets {
			self.deliver(&queue, payload.clone());
		}
		Ok(())
	}

	fn check_live(&self, epoch: u64) -> Result<(), BrokerError> {
		if self.live.contains_key(&epoch) {
			Ok(())
		} else {
			Err(BrokerError::ConnectionClosed)
		}
	}

	fn check_declare(&self, name: &str) -> Result<(), BrokerError> {
		match &self.declare_rejection {
			| Some(reason) => Err(BrokerError::DeclareRejected {
				name: name.to_owned(),
				reason: reason.clone(),
			}),
			| None => Ok(()),
		}
	}
}

/// Factory handing out connections to one [`MemoryBroker`].
pub struct MemoryConnectionFactory {
	broker: MemoryBroker,
}

#[async_trait]
impl ConnectionFactory for MemoryConnectionFactory {
	async fn create(&self) -> Result<Arc<dyn Connection>, BrokerError> {
		let mut state =
			self.broker.state.lock().expect("broker state poisoned");
		if state.refuse_connections {
			return Err(BrokerError::ConnectionClosed);
		}
		let epoch = state.next_epoch;
		state.next_epoch += 1;
		let (closed_tx, closed_rx) = watch::channel(false);
		state.live.insert(epoch, closed_tx);
		debug!(epoch, "memory broker connection created");
		Ok(Arc::new(MemoryConnection {
			broker: self.broker.clone(),
			epoch,
			closed: closed_rx,
		}))
	}
}

struct MemoryConnection {
	broker: MemoryBroker,
	epoch: u64,
	closed: watch::Receiver<bool>,
}

#[async_trait]
impl Connection for MemoryConnection {
	async fn create_channel(&self) -> Result<Arc<dyn Channel>, BrokerError> {
		let state = self.broker.state.lock().expect("broker state poisoned");
		state.check_live(self.epoch)?;
		Ok(Arc::new(MemoryChannel {
			broker: self.broker.clone(),
			epoch: self.epoch,
		}))
	}

	async fn wait_closed(&self) {
		let mut closed = self.closed.clone();
		loop {
			if *closed.borrow() {
				return;
			}
			// Sender dropped also means the connection is gone.
			if closed.changed().await.is_err() {
				return;
			}
		}
	}

	async fn close(&self) {
		let mut state = self.broker.state.lock().expect("broker state poisoned");
		state.close_epoch(self.epoch);
	}
}

struct MemoryChannel {
	broker: MemoryBroker,
	epoch: u64,
}

#[async_trait]
impl Channel for MemoryChannel {
	async fn declare_exchange(&self, name: &str) -> Result<(), BrokerError> {
		let mut state = self.broker.state.lock().expect("broker state poisoned");
		state.check_live(self.epoch)?;
		state.check_declare(name)?;
		state.exchanges.entry(name.to_owned()).or_default();
		Ok(())
	}

	async fn delete_exchange(&self, name: &str) -> Result<(), BrokerError> {
		let mut state = self.broker.state.lock().expect("broker state poisoned");
		state.check_live(self.epoch)?;
		state.exchanges.remove(name);
		Ok(())
	}

	async fn declare_queue(
		&self,
		name: &str,
		options: QueueDeclareOptions,
	) -> Result<String, BrokerError> {
		let mut state = self.broker.state.lock().expect("broker state poisoned");
		state.check_live(self.epoch)?;
		state.check_declare(name)?;
		let name = if name.is_empty() {
			let generated = format!("amq.gen-{}", state.next_generated);
			state.next_generated += 1;
			generated
		} else {
			name.to_owned()
		};
		// Redeclaration of an existing queue is a no-op, as with a broker
		// accepting an equivalent declaration.
		if !state.queues.contains_key(&name) {
			state.queues.insert(
				name.clone(),
				QueueState {
					ready: VecDeque::new(),
					consumer: None,
					dead_letter_exchange: options.dead_letter_exchange,
					exclusive: options.exclusive,
					owner: options.exclusive.then_some(self.epoch),
				},
			);
		}
		Ok(name)
	}

	async fn delete_queue(&self, name: &str) -> Result<(), BrokerError> {
		let mut state = self.broker.state.lock().expect("broker state poisoned");
		state.check_live(self.epoch)?;
		if !state.queues.contains_key(name) {
			return Err(BrokerError::QueueNotFound(name.to_owned()));
		}
		state.remove_queue(name);
		Ok(())
	}

	async fn bind_queue(
		&self,
		queue: &str,
		exchange: &str,
	) -> Result<(), BrokerError> {
		let mut state = self.broker.state.lock().expect("broker state poisoned");
		state.check_live(self.epoch)?;
		if !state.queues.contains_key(queue) {
			return Err(BrokerError::QueueNotFound(queue.to_owned()));
		}
		let Some(bound) = state.exchanges.get_mut(exchange) else {
			return Err(BrokerError::ExchangeNotFound(exchange.to_owned()));
		};
		if !bound.iter().any(|q| q == queue) {
			bound.push(queue.to_owned());
		}
		Ok(())
	}

	async fn publish(
		&self,
		exchange: &str,
		payload: Bytes,
	) -> Result<(), BrokerError> {
		let mut state = self.broker.state.lock().expect("broker state poisoned");
		state.check_live(self.epoch)?;
		state.route(exchange, payload)
	}

	async fn consume(
		&self,
		queue: &str,
	) -> Result<Box<dyn Consumer>, BrokerError> {
		let mut state = self.broker.state.lock().expect("broker state poisoned");
		state.check_live(self.epoch)?;
		if !state.queues.contains_key(queue) {
			return Err(BrokerError::QueueNotFound(queue.to_owned()));
		}
		let (sender, receiver) = mpsc::unbounded_channel();
		let backlog: Vec<Bytes> = {
			let q = state.queues.get_mut(queue).expect("checked above");
			q.consumer = Some(sender);
			q.ready.drain(..).collect()
		};
		for payload in backlog {
			state.deliver(queue, payload);
		}
		Ok(Box::new(MemoryConsumer { receiver }))
	}

	async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
		let mut state = self.broker.state.lock().expect("broker state poisoned");
		state
			.unacked
			.remove(&delivery_tag)
			.map(|_| ())
			.ok_or(BrokerError::UnknownDeliveryTag(delivery_tag))
	}

	async fn reject(
		&self,
		delivery_tag: u64,
		requeue: bool,
	) -> Result<(), BrokerError> {
		let mut state = self.broker.state.lock().expect("broker state poisoned");
		let Some(delivery) = state.unacked.remove(&delivery_tag) else {
			return Err(BrokerError::UnknownDeliveryTag(delivery_tag));
		};
		if requeue {
			state.deliver(&delivery.queue, delivery.payload);
			return Ok(());
		}
		let dead_letter = state
			.queues
			.get(&delivery.queue)
			.and_then(|q| q.dead_letter_exchange.clone());
		if let Some(exchange) = dead_letter {
			debug!(
				queue = %delivery.queue,
				exchange = %exchange,
				delivery_tag,
				"dead-lettering rejected message"
			);
			// Dead-letter routing ignores a vanished exchange, matching
			// broker behavior of silently dropping in that case.
			let _ = state.route(&exchange, delivery.payload);
		}
		Ok(())
	}
}

struct MemoryConsumer {
	receiver: mpsc::UnboundedReceiver<BrokerMessage>,
}

#[async_trait]
impl Consumer for MemoryConsumer {
	async fn next(&mut self) -> Option<BrokerMessage> {
		self.receiver.recv().await
	}
}
