use dicom::ul::pdu::PDataValueType;
use dicom::ul::Pdu;
use std::convert::identity;
use std::io::Write;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tokio::sync::oneshot;
use tracing::{debug, error, trace};
use uuid::Uuid;

use super::{
	AskPattern, Association, AssociationError, ChannelError, Command, PresentationContext,
};

/// Maximum PDU length proposed to the peer.
const MAX_PDU_LENGTH: u32 = 16384;

/// A client association that is driven by a dedicated OS thread.
///
/// The association is released as soon as this handle is dropped.
pub struct ClientAssociation {
	channel: Sender<Command>,
	uuid: Uuid,
	presentation_contexts: Vec<PresentationContext>,
}

#[derive(Debug, Clone)]
pub struct ClientAssociationOptions {
	pub calling_aet: String,
	pub called_aet: String,
	pub abstract_syntax: String,
	pub transfer_syntaxes: Vec<String>,
	/// Peer address in the form `host:port`.
	pub address: String,
	/// Read timeout of the underlying socket.
	pub timeout: Duration,
}

impl ClientAssociation {
	pub async fn new(options: ClientAssociationOptions) -> Result<Self, AssociationError> {
		let uuid = Uuid::new_v4();
		let (tx, mut rx) = tokio::sync::mpsc::channel::<Command>(1);
		let (connect_tx, connect_result) =
			oneshot::channel::<Result<Vec<PresentationContext>, AssociationError>>();

		let address = options.address;
		let timeout = options.timeout;
		let thread_name = format!("{}->{}", options.calling_aet, options.called_aet);
		let association_options = dicom::ul::ClientAssociationOptions::new()
			.calling_ae_title(options.calling_aet)
			.called_ae_title(options.called_aet)
			.max_pdu_length(MAX_PDU_LENGTH)
			.with_presentation_context(options.abstract_syntax, options.transfer_syntaxes);

		thread::Builder::new()
			.name(thread_name)
			.spawn(move || {
				let mut association = match association_options.establish_with(&address) {
					Ok(association) => association,
					Err(e) => {
						error!(backend_uuid = uuid.to_string(), "Failed to connect: {e}");
						let _ = connect_tx.send(Err(e.into()));
						return;
					}
				};

				if let Err(err) = association.inner_stream().set_read_timeout(Some(timeout)) {
					debug!(
						backend_uuid = uuid.to_string(),
						"Failed to set read timeout: {err}"
					);
				}

				let presentation_contexts = association
					.presentation_contexts()
					.iter()
					.map(|pctx| PresentationContext {
						id: pctx.id,
						transfer_syntax: pctx.transfer_syntax.clone(),
					})
					.collect();
				if connect_tx.send(Ok(presentation_contexts)).is_err() {
					let _ = association.abort();
					return;
				}

				while let Some(command) = rx.blocking_recv() {
					let result = match command {
						Command::Send(pdu, reply_to) => {
							let send_result = match &pdu {
								// Large data sets are split into chunks that fit the peer's max PDU length
								Pdu::PData { data }
									if data.iter().all(|pdv| pdv.value_type == PDataValueType::Data)
										&& data.iter().map(|pdv| pdv.data.len()).sum::<usize>()
											> association.acceptor_max_pdu_length() as usize =>
								{
									data.iter().try_for_each(|pdv| {
										association
											.send_pdata(pdv.presentation_context_id)
											.write_all(&pdv.data)
											.map_err(AssociationError::ChunkWriter)
									})
								}
								_ => association.send(&pdu).map_err(AssociationError::from),
							};
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
						error!(
							backend_uuid = uuid.to_string(),
							"Error in ClientAssociation backend: {err}"
						);
						let _ = association.abort();
						return;
					}
				}

				match association.release() {
					Ok(()) => trace!(backend_uuid = uuid.to_string(), "Released association"),
					Err(err) => debug!(
						backend_uuid = uuid.to_string(),
						"Failed to release ClientAssociation: {err}"
					),
				}
			})
			.map_err(AssociationError::OsThread)?;

		let presentation_contexts = connect_result
			.await
			.map_err(|_| AssociationError::NotEstablished)??;

		Ok(Self {
			channel: tx,
			uuid,
			presentation_contexts,
		})
	}

	pub const fn uuid(&self) -> &Uuid {
		&self.uuid
	}
}

impl Association for ClientAssociation {
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
