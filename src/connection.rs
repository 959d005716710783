//! Engine lifetime controller.

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::pubsub::error::PubSubError;

/// Handle owning the running engine.
///
/// Returned alongside [`AmqpPubSub`](crate::pubsub::AmqpPubSub) by
/// `connect`. Call [`shutdown`](Self::shutdown) to stop the engine: it
/// cancels all consumers, deletes subscriber queues best-effort and closes
/// the broker connection.
pub struct PubSubConnection {
	shutdown_tx: Option<oneshot::Sender<()>>,
	join_handle: Option<JoinHandle<()>>,
}

impl PubSubConnection {
	pub(crate) fn new(
		shutdown_tx: oneshot::Sender<()>,
		join_handle: JoinHandle<()>,
	) -> Self {
		Self {
			shutdown_tx: Some(shutdown_tx),
			join_handle: Some(join_handle),
		}
	}

	/// Gracefully stops the engine and waits for its cleanup to finish.
	pub async fn shutdown(mut self) -> Result<(), PubSubError> {
		if let Some(shutdown_tx) = self.shutdown_tx.take() {
			if shutdown_tx.send(()).is_err() {
				warn!("pub/sub engine already stopped");
			}
		}
		if let Some(join_handle) = self.join_handle.take() {
			if let Err(err) = join_handle.await {
				warn!(error = %err, "pub/sub engine task failed");
				return Err(PubSubError::EngineStopped);
			}
		}
		Ok(())
	}
}

impl Drop for PubSubConnection {
	fn drop(&mut self) {
		if self.shutdown_tx.is_some() || self.join_handle.is_some() {
			error!(
				"PubSubConnection dropped without calling shutdown(). Please \
				 call shutdown() and await its completion before dropping."
			);
		}
	}
}
