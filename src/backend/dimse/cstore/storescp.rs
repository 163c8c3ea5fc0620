use crate::backend::dimse::association::server::{ServerAssociation, ServerAssociationOptions};
use crate::backend::dimse::association::{Association, AssociationError};
use crate::backend::dimse::cstore::{
	CompositeStoreRequest, CompositeStoreResponse, ReceivedInstance, STATUS_OUT_OF_RESOURCES,
	STATUS_SUCCESS,
};
use crate::backend::dimse::{DicomMessageReader, DicomMessageWriter, ReadError, WriteError};
use crate::config::ReceiverConfig;
use crate::types::AE;
use dicom::ul::Pdu;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Receives the instances that a node sends to this server as C-MOVE destination.
pub struct StoreServiceClassProvider {
	aet: AE,
	listener: TcpListener,
	timeout: Duration,
}

impl StoreServiceClassProvider {
	pub async fn bind(config: &ReceiverConfig, timeout: Duration) -> Result<Self, StoreError> {
		let address = SocketAddr::from((config.interface, config.port));
		let listener = TcpListener::bind(address).await?;
		info!("Started Store Service Class Provider on {address}");
		Ok(Self {
			aet: config.aet.clone(),
			listener,
			timeout,
		})
	}

	/// Accepts associations until the returned task is aborted.
	/// Every received instance is passed to `instances`.
	pub fn spawn(self, instances: UnboundedSender<ReceivedInstance>) -> JoinHandle<()> {
		tokio::spawn(async move {
			loop {
				match self.listener.accept().await {
					Ok((stream, peer)) => {
						let span = info_span!("STORE-SCP", aet = %self.aet, %peer);
						info!("Accepted incoming connection from {peer}");
						let aet = self.aet.clone();
						let timeout = self.timeout;
						let instances = instances.clone();
						tokio::spawn(
							async move {
								if let Err(err) = process(stream, aet, timeout, instances).await {
									error!("{err}");
								}
							}
							.instrument(span),
						);
					}
					Err(err) => error!("Failed to accept incoming connection: {err}"),
				}
			}
		})
	}
}

async fn process(
	stream: TcpStream,
	aet: AE,
	timeout: Duration,
	instances: UnboundedSender<ReceivedInstance>,
) -> Result<(), StoreError> {
	let tcp_stream = stream.into_std()?;
	// dicom-ul reads and writes with blocking IO on the association thread
	tcp_stream.set_nonblocking(false)?;

	let association = ServerAssociation::new(ServerAssociationOptions {
		aet,
		tcp_stream,
		timeout,
	})
	.await?;
	let received = serve(&association, &instances, timeout).await?;
	debug!(received, "Store association finished");
	Ok(())
}

/// Answers C-STORE requests until the peer releases or aborts the association.
pub(crate) async fn serve<A: Association>(
	association: &A,
	instances: &UnboundedSender<ReceivedInstance>,
	timeout: Duration,
) -> Result<usize, StoreError> {
	let mut received = 0;
	loop {
		let message = match association.read_message(timeout).await {
			Ok(message) => message,
			Err(ReadError::UnexpectedPdu(pdu)) => {
				return match *pdu {
					Pdu::ReleaseRQ => {
						association.send(Pdu::ReleaseRP, timeout).await?;
						Ok(received)
					}
					Pdu::AbortRQ { .. } => {
						warn!("Peer aborted the association");
						Ok(received)
					}
					pdu => Err(ReadError::UnexpectedPdu(Box::new(pdu)).into()),
				};
			}
			Err(err) => return Err(err.into()),
		};

		let request = CompositeStoreRequest::try_from(message)?;
		info!(
			sop_instance_uid = %request.affected_sop_instance_uid,
			sop_class_uid = %request.affected_sop_class_uid,
			move_originator_message_id = ?request.move_originator_message_id,
			"Received instance"
		);

		// The instance is handed over before the response, so it is available once the C-MOVE completes
		let mut response = CompositeStoreResponse::to(&request, STATUS_SUCCESS);
		if instances.send(ReceivedInstance::from(request)).is_err() {
			warn!("No retrieval is waiting for the instance");
			response.status = STATUS_OUT_OF_RESOURCES;
		} else {
			received += 1;
		}
		association.write_message(response, timeout).await?;
	}
}

#[derive(Debug, Error)]
pub enum StoreError {
	#[error("Failed to open Store SCP socket: {0}")]
	Io(#[from] std::io::Error),
	#[error(transparent)]
	Association(#[from] AssociationError),
	#[error(transparent)]
	Read(#[from] ReadError),
	#[error(transparent)]
	Write(#[from] WriteError),
}
