use crate::backend::dimse::cmove::movescu::{MoveError, MoveOutcome, MoveServiceClassUser};
use crate::backend::dimse::cmove::CompositeMoveRequest;
use crate::backend::dimse::cstore::storescp::{StoreError, StoreServiceClassProvider};
use crate::backend::dimse::cstore::ReceivedInstance;
use crate::config::ReceiverConfig;
use crate::types::AE;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, instrument};

/// Retrieves instances into this server by moving them to a short-lived Store SCP.
#[derive(Debug)]
pub struct InstanceRetriever {
	receiver: ReceiverConfig,
	timeout: Duration,
	// Retrievals share the receiver port and run one at a time
	lock: Mutex<()>,
}

#[derive(Debug)]
pub struct Retrieval {
	pub outcome: MoveOutcome,
	pub instances: Vec<ReceivedInstance>,
}

impl InstanceRetriever {
	pub fn new(receiver: ReceiverConfig, timeout: Duration) -> Self {
		Self {
			receiver,
			timeout,
			lock: Mutex::new(()),
		}
	}

	/// The move destination that nodes send the instances to.
	pub const fn aet(&self) -> &AE {
		&self.receiver.aet
	}

	/// Runs the C-MOVE and collects every instance received while it was in progress.
	/// The request must name [`Self::aet`] as destination.
	#[instrument(skip_all, fields(aet = %self.receiver.aet))]
	pub async fn retrieve(
		&self,
		movescu: &MoveServiceClassUser,
		request: CompositeMoveRequest,
	) -> Result<Retrieval, RetrieveError> {
		let _guard = self.lock.lock().await;
		let provider = StoreServiceClassProvider::bind(&self.receiver, self.timeout).await?;
		let (tx, mut rx) = mpsc::unbounded_channel();
		let server = provider.spawn(tx);

		let outcome = movescu.invoke(request).await;
		server.abort();
		// Waiting for the cancelled task closes the listener before the next retrieval binds it
		let _ = server.await;
		let outcome = outcome?;

		// Sub-operations are acknowledged before the final C-MOVE-RSP, so nothing is in flight anymore
		let mut instances = Vec::new();
		while let Ok(instance) = rx.try_recv() {
			instances.push(instance);
		}
		debug!(received = instances.len(), completed = outcome.completed, "Retrieval finished");
		Ok(Retrieval { outcome, instances })
	}
}

#[derive(Debug, Error)]
pub enum RetrieveError {
	#[error(transparent)]
	Store(#[from] StoreError),
	#[error(transparent)]
	Move(#[from] MoveError),
}
