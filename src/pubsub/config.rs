//! Configuration for engine creation.

use std::time::Duration;

use crate::naming::{default_transform, TriggerTransform};

/// Engine-level performance and behavior settings.
#[derive(Debug, Clone)]
pub struct EngineSettings {
	/// Capacity of the command channel feeding the engine actor.
	pub command_channel_capacity: usize,
	/// Capacity of each subscriber's delivery channel.
	pub delivery_channel_capacity: usize,
	/// Delay before the first reconnect attempt; doubles per attempt.
	pub reconnect_initial_delay: Duration,
	/// Upper bound on the backoff delay between reconnect attempts.
	pub reconnect_max_delay: Duration,
	/// Reconnect attempts before giving up and staying disconnected.
	pub reconnect_max_attempts: u32,
}

impl Default for EngineSettings {
	fn default() -> Self {
		Self {
			command_channel_capacity: 100,
			delivery_channel_capacity: 500,
			reconnect_initial_delay: Duration::from_millis(100),
			reconnect_max_delay: Duration::from_secs(30),
			reconnect_max_attempts: 10,
		}
	}
}

/// Configuration for [`AmqpPubSub::connect`](crate::pubsub::AmqpPubSub::connect).
#[derive(Clone)]
pub struct PubSubConfig {
	/// Computes broker channel names from trigger + options. Publish and
	/// subscribe sides must use the same transform to reach each other.
	pub trigger_transform: TriggerTransform,
	/// Engine-level performance and behavior settings.
	pub settings: EngineSettings,
}

impl Default for PubSubConfig {
	fn default() -> Self {
		Self {
			trigger_transform: default_transform(),
			settings: EngineSettings::default(),
		}
	}
}

impl PubSubConfig {
	/// Default config with a caller-supplied trigger transform.
	///
	/// The transform must be pure and deterministic: the topology is
	/// re-created from it on every reconnect.
	pub fn with_trigger_transform(transform: TriggerTransform) -> Self {
		Self {
			trigger_transform: transform,
			..Self::default()
		}
	}
}
