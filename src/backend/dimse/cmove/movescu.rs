use crate::backend::dimse::association::client::{ClientAssociation, ClientAssociationOptions};
use crate::backend::dimse::association::{Association, AssociationError};
use crate::backend::dimse::cmove::{CompositeMoveRequest, CompositeMoveResponse, MOVE_SOP_CLASS};
use crate::backend::dimse::{DicomMessageReader, DicomMessageWriter, ReadError, StatusType, WriteError};
use crate::config::DicomNodeConfig;
use crate::types::{AE, UI, US};
use dicom::dictionary_std::uids;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument, trace, warn};

/// Status of a C-MOVE-RSP for an unknown move destination.
const MOVE_DESTINATION_UNKNOWN: US = 0xA801;

pub struct MoveServiceClassUser {
	calling_aet: AE,
	node: DicomNodeConfig,
	timeout: Duration,
}

/// Summary of a finished C-MOVE.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MoveOutcome {
	pub success: bool,
	pub message: String,
	pub completed: US,
	pub failed: US,
	pub warning: US,
}

impl MoveOutcome {
	/// An outcome for a move that could not be started.
	pub fn failed(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
			..Self::default()
		}
	}
}

impl MoveServiceClassUser {
	pub const fn new(calling_aet: AE, node: DicomNodeConfig, timeout: Duration) -> Self {
		Self {
			calling_aet,
			node,
			timeout,
		}
	}

	#[instrument(skip_all, name = "MOVE-SCU", fields(aet = %self.node.aet, destination = %request.destination))]
	pub async fn invoke(&self, request: CompositeMoveRequest) -> Result<MoveOutcome, MoveError> {
		let association = ClientAssociation::new(ClientAssociationOptions {
			calling_aet: self.calling_aet.clone(),
			called_aet: self.node.aet.clone(),
			abstract_syntax: UI::from(MOVE_SOP_CLASS),
			transfer_syntaxes: vec![UI::from(uids::IMPLICIT_VR_LITTLE_ENDIAN)],
			address: self.node.address(),
			timeout: self.timeout,
		})
		.await?;

		retrieve(&association, request, self.timeout).await
	}
}

/// Runs the C-MOVE protocol on an established association.
async fn retrieve<A: Association>(
	association: &A,
	request: CompositeMoveRequest,
	timeout: Duration,
) -> Result<MoveOutcome, MoveError> {
	let destination = request.destination.clone();
	association.write_message(request, timeout).await?;
	trace!("Sent C-MOVE-RQ");

	let mut outcome = MoveOutcome::failed("C-MOVE operation failed");
	loop {
		let response = CompositeMoveResponse::try_from(association.read_message(timeout).await?)?;
		trace!(status = response.status, "Received C-MOVE-RSP");

		outcome.completed = response.completed.unwrap_or(outcome.completed);
		outcome.failed = response.failed.unwrap_or(outcome.failed);
		outcome.warning = response.warning.unwrap_or(outcome.warning);

		let status_type = StatusType::classify(response.status);
		if status_type == StatusType::Pending {
			trace!(remaining = ?response.remaining, "C-MOVE is pending");
			continue;
		}

		(outcome.success, outcome.message) = match (status_type, response.status) {
			(StatusType::Success, _) => (true, String::from("C-MOVE operation completed successfully")),
			(StatusType::Warning, 0x0001 | 0xB000..=0xBFFF) => (
				true,
				String::from("C-MOVE operation completed with warnings or failures"),
			),
			(_, MOVE_DESTINATION_UNKNOWN) => (
				false,
				format!("C-MOVE refused: Destination '{destination}' unknown"),
			),
			(_, status) => (false, format!("C-MOVE failed with status 0x{status:04X}")),
		};
		if let Some(comment) = response.error_comment {
			outcome.message = format!("{}: {comment}", outcome.message);
		}
		break;
	}

	if outcome.success {
		info!(
			completed = outcome.completed,
			failed = outcome.failed,
			warning = outcome.warning,
			"C-MOVE finished"
		);
	} else {
		warn!(reason = %outcome.message, "C-MOVE did not succeed");
	}
	Ok(outcome)
}

#[derive(Debug, Error)]
pub enum MoveError {
	#[error(transparent)]
	Read(#[from] ReadError),
	#[error(transparent)]
	Write(#[from] WriteError),
	#[error(transparent)]
	Association(#[from] AssociationError),
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::backend::dimse::testing::ScriptedAssociation;
	use crate::backend::dimse::DATA_SET_MISSING;
	use dicom::core::{DataElement, PrimitiveValue, VR};
	use dicom::dicom_value;
	use dicom::dictionary_std::tags;
	use dicom::encoding::TransferSyntaxIndex;
	use dicom::object::InMemDicomObject;
	use dicom::transfer_syntax::entries::IMPLICIT_VR_LITTLE_ENDIAN;
	use dicom::ul::pdu::{PDataValue, PDataValueType};
	use dicom::ul::Pdu;
	use pretty_assertions::assert_eq;

	const TIMEOUT: Duration = Duration::from_secs(1);

	fn move_response(status: US, completed: US, failed: US, comment: Option<&str>) -> Pdu {
		let mut command = InMemDicomObject::command_from_element_iter([
			DataElement::new(tags::COMMAND_FIELD, VR::US, dicom_value!(U16, [0x8021])),
			DataElement::new(tags::STATUS, VR::US, dicom_value!(U16, [status])),
			DataElement::new(tags::NUMBER_OF_COMPLETED_SUBOPERATIONS, VR::US, dicom_value!(U16, [completed])),
			DataElement::new(tags::NUMBER_OF_FAILED_SUBOPERATIONS, VR::US, dicom_value!(U16, [failed])),
			DataElement::new(tags::NUMBER_OF_WARNING_SUBOPERATIONS, VR::US, dicom_value!(U16, [0])),
			DataElement::new(tags::COMMAND_DATA_SET_TYPE, VR::US, dicom_value!(U16, [DATA_SET_MISSING])),
		]);
		if let Some(comment) = comment {
			command.put(DataElement::new(tags::ERROR_COMMENT, VR::LO, PrimitiveValue::from(comment)));
		}
		let mut data = Vec::new();
		command
			.write_dataset_with_ts(&mut data, &IMPLICIT_VR_LITTLE_ENDIAN.erased())
			.unwrap();
		Pdu::PData {
			data: vec![PDataValue {
				value_type: PDataValueType::Command,
				presentation_context_id: 1,
				is_last: true,
				data,
			}],
		}
	}

	fn request() -> CompositeMoveRequest {
		CompositeMoveRequest::new(1, AE::from("STORE_SCP")).series(None, "1.2.3")
	}

	#[tokio::test]
	async fn counts_sub_operations_until_success() {
		let association = ScriptedAssociation::new([
			move_response(0xFF00, 1, 0, None),
			move_response(0xFF00, 2, 0, None),
			move_response(0x0000, 3, 0, None),
		]);

		let outcome = retrieve(&association, request(), TIMEOUT).await.unwrap();

		assert_eq!(
			outcome,
			MoveOutcome {
				success: true,
				message: String::from("C-MOVE operation completed successfully"),
				completed: 3,
				failed: 0,
				warning: 0,
			}
		);
		assert_eq!(association.sent.lock().unwrap().len(), 2);
	}

	#[tokio::test]
	async fn partial_failures_are_successful_with_warnings() {
		let association = ScriptedAssociation::new([move_response(0xB000, 2, 1, None)]);

		let outcome = retrieve(&association, request(), TIMEOUT).await.unwrap();

		assert!(outcome.success);
		assert_eq!(outcome.failed, 1);
		assert_eq!(
			outcome.message,
			"C-MOVE operation completed with warnings or failures"
		);
	}

	#[tokio::test]
	async fn unknown_destination_is_reported() {
		let association = ScriptedAssociation::new([move_response(0xA801, 0, 0, Some("No such AE"))]);

		let outcome = retrieve(&association, request(), TIMEOUT).await.unwrap();

		assert!(!outcome.success);
		assert_eq!(
			outcome.message,
			"C-MOVE refused: Destination 'STORE_SCP' unknown: No such AE"
		);
	}

	#[tokio::test]
	async fn other_statuses_are_failures() {
		let association = ScriptedAssociation::new([move_response(0xC000, 0, 3, None)]);

		let outcome = retrieve(&association, request(), TIMEOUT).await.unwrap();

		assert!(!outcome.success);
		assert_eq!(outcome.message, "C-MOVE failed with status 0xC000");
	}
}
