//! In-memory subscription registry.
//!
//! Single source of truth for which subscriber ids are live. Ids are
//! monotonically assigned and never reused while the process runs, and
//! iteration follows registration order, which is also the order the
//! lifecycle manager rebuilds topology in after a reconnect.

use std::collections::BTreeMap;
use std::fmt;

use arcstr::ArcStr;
use thiserror::Error;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;

use super::delivery::DeliveryResult;
use crate::naming::ChannelOptions;

/// Unique id of one live subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
	/// Raw numeric value, for logging or external correlation.
	pub fn to_raw(self) -> u64 {
		self.0
	}

	/// Rebuilds an id from its raw value, e.g. one carried over an API
	/// boundary. Only ids previously issued by the engine resolve to a
	/// live subscription.
	pub fn from_raw(raw: u64) -> Self {
		Self(raw)
	}
}

impl fmt::Display for SubscriptionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Unsubscribe named an id that is not registered.
///
/// A hard failure by contract: it distinguishes a double-unsubscribe bug
/// from a benign no-op.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown subscription id {0}")]
pub struct UnknownSubscriptionError(pub SubscriptionId);

/// One registered subscriber.
pub(crate) struct Subscription {
	pub id: SubscriptionId,
	pub trigger: String,
	pub options: ChannelOptions,
	pub channel_name: ArcStr,
	/// Broker-generated exclusive queue; replaced on reconnect.
	pub queue_name: String,
	/// Feed into the subscriber's callback task. Cloned for each new
	/// consumer task so delivery survives consumer replacement.
	pub delivery_tx: Sender<DeliveryResult>,
	/// Consumer task for the current connection; replaced on reconnect.
	pub consumer_task: JoinHandle<()>,
	/// Long-lived task draining `delivery_tx` into the callback.
	pub callback_task: JoinHandle<()>,
}

/// Mapping from subscriber id to subscription metadata.
///
/// Keys are monotonic, so `BTreeMap` iteration order is registration
/// order.
#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
	entries: BTreeMap<SubscriptionId, Subscription>,
	next_id: u64,
}

impl SubscriptionRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Allocates the next id. Ids are never handed out twice, even after
	/// the subscription is removed.
	pub fn allocate_id(&mut self) -> SubscriptionId {
		let id = SubscriptionId(self.next_id);
		self.next_id += 1;
		id
	}

	pub fn insert(&mut self, subscription: Subscription) {
		self.entries.insert(subscription.id, subscription);
	}

	pub fn get(&self, id: SubscriptionId) -> Option<&Subscription> {
		self.entries.get(&id)
	}

	pub fn get_mut(&mut self, id: SubscriptionId) -> Option<&mut Subscription> {
		self.entries.get_mut(&id)
	}

	pub fn remove(
		&mut self,
		id: SubscriptionId,
	) -> Result<Subscription, UnknownSubscriptionError> {
		self.entries.remove(&id).ok_or(UnknownSubscriptionError(id))
	}

	/// Live ids in registration order.
	pub fn ids(&self) -> Vec<SubscriptionId> {
		self.entries.keys().copied().collect()
	}

	pub fn drain(&mut self) -> impl Iterator<Item = Subscription> {
		std::mem::take(&mut self.entries).into_values()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}
}
