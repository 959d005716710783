//! Trigger-to-channel name resolution.
//!
//! A trigger name is a logical event stream, not a broker address. The
//! resolver turns a trigger plus its per-subscription [`ChannelOptions`]
//! into the channel name used for broker addressing, via a pure
//! [`TriggerTransform`]. Publish and subscribe sides must apply the same
//! transform to agree on a channel name.

use std::sync::Arc;

use arcstr::ArcStr;
use serde::{Deserialize, Serialize};

/// Per-subscription qualifiers narrowing a trigger to a routing path.
///
/// Only `path` is consumed by the default transform; each segment is
/// appended to the trigger name when computing the channel name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelOptions {
	/// Ordered path segments appended to the trigger name.
	pub path: Vec<String>,
}

impl ChannelOptions {
	/// Options with the given path segments.
	pub fn with_path<I, S>(path: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			path: path.into_iter().map(Into::into).collect(),
		}
	}
}

/// Pure function computing a channel name from a trigger and its options.
///
/// Must be deterministic: the topology is re-created from registry entries
/// on reconnect, so the same inputs have to keep producing the same name.
pub type TriggerTransform =
	Arc<dyn Fn(&str, &ChannelOptions) -> String + Send + Sync>;

/// The default transform: `join([trigger, ...path], ".")`.
pub fn default_transform() -> TriggerTransform {
	Arc::new(|trigger, options| {
		let mut name = String::from(trigger);
		for segment in &options.path {
			name.push('.');
			name.push_str(segment);
		}
		name
	})
}

/// Resolves the channel name for a trigger. Pure, no I/O.
pub fn resolve_channel(
	trigger: &str,
	options: &ChannelOptions,
	transform: &TriggerTransform,
) -> ArcStr {
	ArcStr::from(transform(trigger, options))
}

/// Dead-letter exchange name for a channel.
pub fn dlq_exchange_name(channel: &str) -> String {
	format!("{channel}.DLQ.Exchange")
}

/// Dead-letter queue name for a channel.
pub fn dlq_queue_name(channel: &str) -> String {
	format!("{channel}.DLQ")
}
