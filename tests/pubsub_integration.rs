//! End-to-end engine scenarios against the in-process broker.

use std::sync::Arc;
use std::time::Duration;

use amqp_pubsub::{
	AmqpPubSub, ChannelOptions, DeliveryResult, MemoryBroker, Payload,
	PayloadDecodeError, PubSubConfig, PubSubError, SubscriberCallback,
	SubscriptionId, TriggerTransform,
};
use amqp_pubsub::{Channel as _, Connection as _, ConnectionFactory as _};
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.try_init();
}

/// Callback that forwards every delivery into an inspectable channel.
fn collector() -> (SubscriberCallback, mpsc::UnboundedReceiver<DeliveryResult>)
{
	let (tx, rx) = mpsc::unbounded_channel();
	let callback: SubscriberCallback = Box::new(move |result| {
		let _ = tx.send(result);
	});
	(callback, rx)
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<DeliveryResult>) -> DeliveryResult {
	timeout(Duration::from_secs(2), rx.recv())
		.await
		.expect("timed out waiting for delivery")
		.expect("delivery channel closed")
}

/// Asserts nothing arrives on `rx` within a grace window. A closed
/// channel also counts as silent.
async fn assert_silent(rx: &mut mpsc::UnboundedReceiver<DeliveryResult>) {
	match timeout(Duration::from_millis(200), rx.recv()).await {
		| Err(_elapsed) => {}
		| Ok(None) => {}
		| Ok(Some(delivery)) => {
			panic!("unexpected delivery: {delivery:?}")
		}
	}
}

async fn engine(broker: &MemoryBroker) -> (AmqpPubSub, amqp_pubsub::PubSubConnection) {
	init_tracing();
	AmqpPubSub::connect(broker.factory(), PubSubConfig::default())
		.await
		.expect("engine connect failed")
}

/// Polls `publish` until the engine has reconnected; panics if it never
/// does within the window.
async fn publish_after_reconnect(pubsub: &AmqpPubSub, trigger: &str, text: &str) {
	for _ in 0 .. 50 {
		match pubsub.publish(trigger, text).await {
			| Ok(()) => return,
			| Err(PubSubError::Connection(_)) => {
				sleep(Duration::from_millis(100)).await;
			}
			| Err(other) => panic!("unexpected publish error: {other}"),
		}
	}
	panic!("engine never reconnected");
}

#[tokio::test]
async fn subscribe_publish_delivers_the_payload() {
	let broker = MemoryBroker::new();
	let (pubsub, connection) = engine(&broker).await;
	let (callback, mut rx) = collector();

	let id = pubsub.subscribe("Trigger1", callback).await.unwrap();
	pubsub.publish("Trigger1", "good").await.unwrap();

	assert_eq!(recv(&mut rx).await.unwrap(), Payload::from("good"));

	pubsub.unsubscribe(id).await.unwrap();
	connection.shutdown().await.unwrap();
}

#[tokio::test]
async fn deliveries_to_one_subscriber_keep_arrival_order() {
	let broker = MemoryBroker::new();
	let (pubsub, connection) = engine(&broker).await;
	let (callback, mut rx) = collector();

	pubsub.subscribe("Trigger1", callback).await.unwrap();
	for text in ["a", "b", "c"] {
		pubsub.publish("Trigger1", text).await.unwrap();
	}

	for text in ["a", "b", "c"] {
		assert_eq!(recv(&mut rx).await.unwrap(), Payload::from(text));
	}
	connection.shutdown().await.unwrap();
}

#[tokio::test]
async fn two_subscribers_on_one_trigger_are_independent() {
	let broker = MemoryBroker::new();
	let (pubsub, connection) = engine(&broker).await;
	let (callback1, mut rx1) = collector();
	let (callback2, mut rx2) = collector();

	pubsub.subscribe("Trigger1", callback1).await.unwrap();
	pubsub.subscribe("Trigger1", callback2).await.unwrap();
	pubsub.publish("Trigger1", "fanout").await.unwrap();

	assert_eq!(recv(&mut rx1).await.unwrap(), Payload::from("fanout"));
	assert_eq!(recv(&mut rx2).await.unwrap(), Payload::from("fanout"));
	connection.shutdown().await.unwrap();
}

#[tokio::test]
async fn unsubscribed_callback_is_never_invoked() {
	let broker = MemoryBroker::new();
	let (pubsub, connection) = engine(&broker).await;
	let (callback, mut rx) = collector();

	let id = pubsub.subscribe("Trigger1", callback).await.unwrap();
	pubsub.unsubscribe(id).await.unwrap();
	pubsub.publish("Trigger1", "bad").await.unwrap();

	assert_silent(&mut rx).await;
	connection.shutdown().await.unwrap();
}

#[tokio::test]
async fn unsubscribe_of_unknown_or_removed_id_fails() {
	let broker = MemoryBroker::new();
	let (pubsub, connection) = engine(&broker).await;
	let (callback, _rx) = collector();

	// Never-issued id.
	let err = pubsub
		.unsubscribe(SubscriptionId::from_raw(123))
		.await
		.unwrap_err();
	assert!(matches!(err, PubSubError::UnknownSubscription(_)));

	// Already-removed id.
	let id = pubsub.subscribe("Trigger1", callback).await.unwrap();
	pubsub.unsubscribe(id).await.unwrap();
	let err = pubsub.unsubscribe(id).await.unwrap_err();
	assert!(matches!(err, PubSubError::UnknownSubscription(_)));

	connection.shutdown().await.unwrap();
}

#[tokio::test]
async fn undecodable_payload_is_reported_and_dead_lettered_once() {
	let broker = MemoryBroker::new();
	let (pubsub, connection) = engine(&broker).await;
	let (callback, mut rx) = collector();

	pubsub.subscribe("Trigger1", callback).await.unwrap();

	// Raw, non-UTF-8 bytes published behind the engine's back.
	let raw = broker.factory().create().await.unwrap();
	let raw_channel = raw.create_channel().await.unwrap();
	raw_channel
		.publish("Trigger1", Bytes::from_static(&[0xff, 0xfe, 0xfd]))
		.await
		.unwrap();

	let err = recv(&mut rx).await.unwrap_err();
	assert!(matches!(err, PayloadDecodeError::InvalidUtf8(_)));

	// Dead-lettered exactly once, no redelivery loop.
	assert_eq!(broker.queue_depth("Trigger1.DLQ"), Some(1));
	assert_silent(&mut rx).await;

	// A good message afterwards still flows.
	pubsub.publish("Trigger1", "still alive").await.unwrap();
	assert_eq!(recv(&mut rx).await.unwrap(), Payload::from("still alive"));
	assert_eq!(broker.queue_depth("Trigger1.DLQ"), Some(1));

	raw.close().await;
	connection.shutdown().await.unwrap();
}

#[tokio::test]
async fn channel_options_narrow_the_trigger_to_a_channel() {
	let broker = MemoryBroker::new();
	let transform: TriggerTransform = Arc::new(|trigger, options| {
		std::iter::once(trigger.to_owned())
			.chain(options.path.iter().cloned())
			.collect::<Vec<_>>()
			.join(".")
	});
	let (pubsub, connection) = AmqpPubSub::connect(
		broker.factory(),
		PubSubConfig::with_trigger_transform(transform),
	)
	.await
	.unwrap();
	let (callback, mut rx) = collector();

	pubsub
		.subscribe_with_options(
			"comments",
			ChannelOptions::with_path(["graphql-rabbitmq-subscriptions"]),
			callback,
		)
		.await
		.unwrap();

	// Publishing to the resolved channel name reaches the subscriber.
	pubsub
		.publish("comments.graphql-rabbitmq-subscriptions", "test")
		.await
		.unwrap();
	assert_eq!(recv(&mut rx).await.unwrap(), Payload::from("test"));

	// The bare trigger is a different channel.
	pubsub.publish("comments", "missed").await.unwrap();
	assert_silent(&mut rx).await;

	connection.shutdown().await.unwrap();
}

#[tokio::test]
async fn unrelated_trigger_reaches_no_subscriber() {
	let broker = MemoryBroker::new();
	let (pubsub, connection) = engine(&broker).await;
	let (callback1, mut rx1) = collector();
	let (callback2, mut rx2) = collector();

	pubsub.subscribe("Trigger1", callback1).await.unwrap();
	pubsub.subscribe("Trigger2", callback2).await.unwrap();

	pubsub.publish("NotATrigger", "nobody").await.unwrap();
	assert_silent(&mut rx1).await;
	assert_silent(&mut rx2).await;

	pubsub.publish("Trigger1", "one").await.unwrap();
	pubsub.publish("Trigger2", "two").await.unwrap();
	assert_eq!(recv(&mut rx1).await.unwrap(), Payload::from("one"));
	assert_eq!(recv(&mut rx2).await.unwrap(), Payload::from("two"));

	connection.shutdown().await.unwrap();
}

#[tokio::test]
async fn structured_payloads_round_trip_as_json() {
	let broker = MemoryBroker::new();
	let (pubsub, connection) = engine(&broker).await;
	let (callback, mut rx) = collector();

	pubsub.subscribe("Filter1", callback).await.unwrap();
	let value = serde_json::json!({"filterBoolean": true});
	pubsub.publish("Filter1", value.clone()).await.unwrap();

	assert_eq!(recv(&mut rx).await.unwrap(), Payload::Json(value));
	connection.shutdown().await.unwrap();
}

#[tokio::test]
async fn panicking_callback_does_not_affect_other_subscribers() {
	let broker = MemoryBroker::new();
	let (pubsub, connection) = engine(&broker).await;
	let panicking: SubscriberCallback = Box::new(|_| {
		panic!("subscriber bug");
	});
	let (callback, mut rx) = collector();

	pubsub.subscribe("Trigger1", panicking).await.unwrap();
	pubsub.subscribe("Trigger1", callback).await.unwrap();

	pubsub.publish("Trigger1", "first").await.unwrap();
	pubsub.publish("Trigger1", "second").await.unwrap();

	assert_eq!(recv(&mut rx).await.unwrap(), Payload::from("first"));
	assert_eq!(recv(&mut rx).await.unwrap(), Payload::from("second"));

	connection.shutdown().await.unwrap();
}

#[tokio::test]
async fn reconnect_rebuilds_topology_and_consumers() {
	let broker = MemoryBroker::new();
	let (pubsub, connection) = engine(&broker).await;
	let (callback, mut rx) = collector();

	pubsub.subscribe("Trigger1", callback).await.unwrap();
	pubsub.publish("Trigger1", "before").await.unwrap();
	assert_eq!(recv(&mut rx).await.unwrap(), Payload::from("before"));

	// Hold the broker down so the outage window is observable.
	broker.set_refuse_connections(true);
	broker.drop_connections();

	// While the link is down, publish fails fast instead of queueing.
	let err = pubsub.publish("Trigger1", "down").await.unwrap_err();
	assert!(matches!(err, PubSubError::Connection(_)));

	// The engine reconnects and recovers the subscription on its own;
	// poll until a publish goes through again.
	broker.set_refuse_connections(false);
	publish_after_reconnect(&pubsub, "Trigger1", "after").await;
	assert_eq!(recv(&mut rx).await.unwrap(), Payload::from("after"));

	connection.shutdown().await.unwrap();
}

#[tokio::test]
async fn subscribe_fails_fast_while_disconnected() {
	let broker = MemoryBroker::new();
	let (pubsub, connection) = engine(&broker).await;
	let (callback, mut rx) = collector();

	broker.set_refuse_connections(true);
	broker.drop_connections();

	let err = pubsub.subscribe("Trigger1", callback).await.unwrap_err();
	assert!(matches!(err, PubSubError::Connection(_)));

	// The failed subscribe registered nothing: after recovery a publish
	// to the trigger reaches nobody.
	broker.set_refuse_connections(false);
	publish_after_reconnect(&pubsub, "Trigger1", "nobody").await;
	assert_silent(&mut rx).await;

	connection.shutdown().await.unwrap();
}

#[tokio::test]
async fn reconnect_budget_exhaustion_leaves_the_engine_disconnected() {
	init_tracing();
	let broker = MemoryBroker::new();
	let mut config = PubSubConfig::default();
	config.settings.reconnect_initial_delay = Duration::from_millis(1);
	config.settings.reconnect_max_delay = Duration::from_millis(2);
	config.settings.reconnect_max_attempts = 2;
	let (pubsub, connection) =
		AmqpPubSub::connect(broker.factory(), config).await.unwrap();

	// Hold the broker down until every reconnect attempt has burned.
	broker.set_refuse_connections(true);
	broker.drop_connections();
	sleep(Duration::from_millis(200)).await;
	broker.set_refuse_connections(false);

	// Give-up is permanent: the engine never probes again on its own,
	// even with the broker back.
	for _ in 0 .. 5 {
		let err = pubsub.publish("Trigger1", "late").await.unwrap_err();
		assert!(matches!(err, PubSubError::Connection(_)));
		sleep(Duration::from_millis(20)).await;
	}

	connection.shutdown().await.unwrap();
}

#[tokio::test]
async fn rejected_declaration_surfaces_as_topology_error() {
	let broker = MemoryBroker::new();
	let (pubsub, connection) = engine(&broker).await;
	let (callback, mut rx) = collector();

	broker.set_declare_rejection(Some("incompatible existing declaration"));

	let err = pubsub.subscribe("Trigger1", callback).await.unwrap_err();
	assert!(matches!(err, PubSubError::Topology(_)));
	let err = pubsub.publish("Trigger1", "x").await.unwrap_err();
	assert!(matches!(err, PubSubError::Topology(_)));

	// The failed subscribe registered nothing: with declarations working
	// again, a publish to the trigger reaches nobody.
	broker.set_declare_rejection(None);
	pubsub.publish("Trigger1", "nobody").await.unwrap();
	assert_silent(&mut rx).await;

	connection.shutdown().await.unwrap();
}
