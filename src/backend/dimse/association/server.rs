use super::{
	oneshot, AskPattern, Association, AssociationError, ChannelError, Command, PresentationContext,
	Sender,
};
use dicom::transfer_syntax::TransferSyntaxRegistry;
use dicom::ul::pdu::PresentationContextResultReason;
use dicom::ul::Pdu;
use std::convert::identity;
use std::net::{Shutdown, TcpStream};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info};
use uuid::Uuid;

/// An association accepted from a peer, driven by a dedicated OS thread.
#[derive(Debug)]
pub struct ServerAssociation {
	channel: Sender<Command>,
	presentation_contexts: Vec<PresentationContext>,
	tcp_stream: TcpStream,
}

pub struct ServerAssociationOptions {
	pub aet: String,
	pub tcp_stream: TcpStream,
	/// Read timeout of the underlying socket.
	pub timeout: Duration,
}

impl ServerAssociation {
	pub async fn new(options: ServerAssociationOptions) -> Result<Self, AssociationError> {
		let uuid = Uuid::new_v4();
		let mut server_options = dicom::ul::ServerAssociationOptions::new()
			.ae_title(options.aet.clone())
			.promiscuous(true)
			.read_timeout(options.timeout);

		// Received instances are kept in memory, so only uncompressed transfer syntaxes are offered
		for syntax in TransferSyntaxRegistry.iter() {
			if syntax.is_codec_free() {
				server_options = server_options.with_transfer_syntax(syntax.uid());
			}
		}

		let (connect_tx, connect_result) =
			oneshot::channel::<Result<(TcpStream, Vec<PresentationContext>), AssociationError>>();
		let (tx, mut rx) = tokio::sync::mpsc::channel::<Command>(1);

		thread::Builder::new()
			.name(format!("{}-server", options.aet))
			.spawn(move || {
				let span = tracing::info_span!("ServerAssociation", association_id = uuid.to_string());
				let _enter = span.enter();

				let mut association = match server_options.establish(options.tcp_stream) {
					Ok(association) => association,
					Err(e) => {
						let _ = connect_tx.send(Err(e.into()));
						return;
					}
				};
				info!(
					calling_aet = association.client_ae_title(),
					called_aet = options.aet,
					"Established new server association"
				);

				let presentation_contexts = association
					.presentation_contexts()
					.iter()
					.filter(|pctx| pctx.reason == PresentationContextResultReason::Acceptance)
					.map(|pctx| PresentationContext {
						id: pctx.id,
						transfer_syntax: pctx.transfer_syntax.clone(),
					})
					.collect();
				let stream = match association.inner_stream().try_clone() {
					Ok(stream) => stream,
					Err(err) => {
						let _ = connect_tx.send(Err(AssociationError::Stream(err)));
						let _ = association.abort();
						return;
					}
				};
				if connect_tx.send(Ok((stream, presentation_contexts))).is_err() {
					let _ = association.abort();
					return;
				}

				while let Some(command) = rx.blocking_recv() {
					let result = match command {
						Command::Send(pdu, reply_to) => {
							let send_result = association.send(&pdu).map_err(AssociationError::from);
							reply_to.send(send_result).map_err(|_| ChannelError::Closed)
						}
						Command::Receive(reply_to) => {
							let receive_result = association.receive().map_err(AssociationError::from);
							reply_to
								.send(receive_result)
								.map_err(|_| ChannelError::Closed)
						}
					};

					if let Some(err) = result.err() {
						error!("Error in ServerAssociation: {err}");
						let _ = association.abort();
						return;
					}
				}
				debug!("ServerAssociation handle was dropped");
			})
			.map_err(AssociationError::OsThread)?;

		let (tcp_stream, presentation_contexts) = connect_result
			.await
			.map_err(|_| AssociationError::NotEstablished)??;

		Ok(Self {
			channel: tx,
			presentation_contexts,
			tcp_stream,
		})
	}
}

impl Association for ServerAssociation {
	async fn receive(&self, timeout: Duration) -> Result<Pdu, AssociationError> {
		self.channel
			.ask(Command::Receive, timeout)
			.await
			.map_err(AssociationError::Channel)
			.and_then(identity)
	}

	async fn send(&self, pdu: Pdu, timeout: Duration) -> Result<(), AssociationError> {
		self.channel
			.ask(|reply_to| Command::Send(pdu, reply_to), timeout)
			.await
			.map_err(AssociationError::Channel)
			.and_then(identity)
	}

	fn presentation_contexts(&self) -> &[PresentationContext] {
		&self.presentation_contexts
	}
}

impl Drop for ServerAssociation {
	fn drop(&mut self) {
		if let Err(err) = self.tcp_stream.shutdown(Shutdown::Both) {
			// The peer usually closed the connection already after the release
			debug!("TcpStream::shutdown failed: {err}");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn rejected_connections_are_not_established() {
		let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
		let address = listener.local_addr().unwrap();
		let client = std::thread::spawn(move || {
			// Closing right away is not a valid A-ASSOCIATE-RQ
			drop(std::net::TcpStream::connect(address).unwrap());
		});
		let (tcp_stream, _) = listener.accept().unwrap();
		client.join().unwrap();

		let result = ServerAssociation::new(ServerAssociationOptions {
			aet: String::from("DICOM-MCP"),
			tcp_stream,
			timeout: Duration::from_secs(1),
		})
		.await;

		assert!(result.is_err());
	}
}
