use std::time::Duration;

use thiserror::Error;
use tracing::{debug, instrument, trace};

use super::{CompositeEchoRequest, CompositeEchoResponse};
use crate::backend::dimse::association::client::{ClientAssociation, ClientAssociationOptions};
use crate::backend::dimse::association::{Association, AssociationError};
use crate::backend::dimse::{
	next_message_id, DicomMessageReader, DicomMessageWriter, ReadError, StatusType, WriteError,
};
use crate::config::DicomNodeConfig;
use crate::types::{AE, UI, US};
use dicom::dictionary_std::uids;

/// Service class user for the Verification SOP class.
/// It simply sends a C-ECHO-RQ and waits for a C-ECHO-RSP.
/// The response contains the Status attribute that indicates the current connection status.
pub struct EchoServiceClassUser {
	calling_aet: AE,
	node: DicomNodeConfig,
	timeout: Duration,
}

/// The outcome of a C-ECHO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoOutcome {
	pub status: US,
	pub success: bool,
}

impl EchoServiceClassUser {
	pub const fn new(calling_aet: AE, node: DicomNodeConfig, timeout: Duration) -> Self {
		Self {
			calling_aet,
			node,
			timeout,
		}
	}

	/// Initiates the C-ECHO protocol.
	#[instrument(skip_all, name = "ECHO-SCU", fields(aet = %self.node.aet))]
	pub async fn echo(&self) -> Result<EchoOutcome, EchoError> {
		let association = ClientAssociation::new(ClientAssociationOptions {
			calling_aet: self.calling_aet.clone(),
			called_aet: self.node.aet.clone(),
			abstract_syntax: UI::from(uids::VERIFICATION),
			transfer_syntaxes: vec![UI::from(uids::IMPLICIT_VR_LITTLE_ENDIAN)],
			address: self.node.address(),
			timeout: self.timeout,
		})
		.await?;

		echo(&association, self.timeout).await
	}
}

async fn echo<A: Association>(association: &A, timeout: Duration) -> Result<EchoOutcome, EchoError> {
	trace!("Initiated C-ECHO protocol");
	let request = CompositeEchoRequest {
		message_id: next_message_id(),
	};
	association.write_message(request, timeout).await?;

	let response = association.read_message(timeout).await?;
	let response = CompositeEchoResponse::try_from(response)?;

	let status_type = StatusType::classify(response.status);
	debug!(
		status = response.status,
		"Received C-ECHO-RSP ({status_type:?})"
	);
	Ok(EchoOutcome {
		status: response.status,
		success: status_type == StatusType::Success,
	})
}

/// Errors that can occur for the echoscu.
#[derive(Debug, Error)]
pub enum EchoError {
	#[error(transparent)]
	Association(#[from] AssociationError),
	#[error(transparent)]
	Write(#[from] WriteError),
	#[error(transparent)]
	Read(#[from] ReadError),
}
