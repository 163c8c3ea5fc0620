use dicom::ul::Pdu;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::Sender;
use tokio::sync::oneshot;

pub mod client;
pub mod server;

#[derive(Debug, Error)]
pub enum AssociationError {
	#[error(transparent)]
	Channel(#[from] ChannelError),
	#[error("Failed to spawn thread")]
	OsThread(std::io::Error),
	#[error("Failed to clone TCP stream: {0}")]
	Stream(std::io::Error),
	#[error("Failed to write P-DATA chunk: {0}")]
	ChunkWriter(std::io::Error),
	#[error(transparent)]
	Association(#[from] dicom::ul::association::Error),
	#[error("Association was rejected or aborted before it was established")]
	NotEstablished,
}

/// A negotiated presentation context that was accepted by the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentationContext {
	pub id: u8,
	pub transfer_syntax: String,
}

/// An established association that exchanges PDUs with a peer.
pub trait Association {
	fn receive(
		&self,
		timeout: Duration,
	) -> impl Future<Output = Result<Pdu, AssociationError>> + Send;

	fn send(
		&self,
		pdu: Pdu,
		timeout: Duration,
	) -> impl Future<Output = Result<(), AssociationError>> + Send;

	fn presentation_contexts(&self) -> &[PresentationContext];
}

#[derive(Debug)]
pub enum Command {
	Send(Pdu, oneshot::Sender<Result<(), AssociationError>>),
	Receive(oneshot::Sender<Result<Pdu, AssociationError>>),
}

#[derive(Debug, Error)]
pub enum ChannelError {
	#[error("Timed out")]
	Timeout,
	#[error("Channel is closed")]
	Closed,
}

pub trait AskPattern<T> {
	async fn ask<R>(
		&self,
		command: impl FnOnce(oneshot::Sender<R>) -> T,
		timeout: Duration,
	) -> Result<R, ChannelError>;
}

impl<T> AskPattern<T> for Sender<T> {
	async fn ask<R>(
		&self,
		command: impl FnOnce(oneshot::Sender<R>) -> T,
		timeout: Duration,
	) -> Result<R, ChannelError> {
		let (tx, rx) = oneshot::channel();
		tokio::time::timeout(timeout, async {
			self.send(command(tx))
				.await
				.map_err(|_| ChannelError::Closed)?;

			rx.await.map_err(|_| ChannelError::Closed)
		})
		.await
		.map_err(|_| ChannelError::Timeout)?
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tokio::sync::mpsc;

	#[tokio::test]
	async fn ask_returns_the_reply() {
		let (tx, mut rx) = mpsc::channel::<oneshot::Sender<u16>>(1);
		tokio::spawn(async move {
			if let Some(reply_to) = rx.recv().await {
				let _ = reply_to.send(42);
			}
		});

		let reply = tx.ask(|reply_to| reply_to, Duration::from_secs(1)).await;

		assert_eq!(reply.unwrap(), 42);
	}

	#[tokio::test]
	async fn ask_times_out_without_reply() {
		let (tx, _rx) = mpsc::channel::<oneshot::Sender<u16>>(1);

		let reply = tx.ask(|reply_to| reply_to, Duration::from_millis(20)).await;

		assert!(matches!(reply, Err(ChannelError::Timeout)));
	}

	#[tokio::test]
	async fn ask_fails_on_closed_channel() {
		let (tx, rx) = mpsc::channel::<oneshot::Sender<u16>>(1);
		drop(rx);

		let reply = tx.ask(|reply_to| reply_to, Duration::from_secs(1)).await;

		assert!(matches!(reply, Err(ChannelError::Closed)));
	}
}
