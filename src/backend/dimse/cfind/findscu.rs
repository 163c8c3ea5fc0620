use crate::backend::dimse::association::client::{ClientAssociation, ClientAssociationOptions};
use crate::backend::dimse::association::{Association, AssociationError};
use crate::backend::dimse::cfind::{CompositeFindRequest, CompositeFindResponse};
use crate::backend::dimse::{
	next_message_id, DicomMessageReader, DicomMessageWriter, ReadError, StatusType, WriteError,
};
use crate::config::DicomNodeConfig;
use crate::query::{FindTransport, TransportError};
use crate::types::{QueryInformationModel, AE, PRIORITY_MEDIUM, UI, US};
use async_trait::async_trait;
use dicom::dictionary_std::uids;
use dicom::object::InMemDicomObject;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, trace, warn};

/// Service class user for the query SOP classes of the Query/Retrieve service.
/// Opens one association per request and releases it once all responses are received.
pub struct FindServiceClassUser {
	calling_aet: AE,
	node: DicomNodeConfig,
	timeout: Duration,
}

pub struct FindServiceClassUserOptions {
	pub query_information_model: QueryInformationModel,
	pub identifier: InMemDicomObject,
	pub message_id: US,
	pub priority: US,
}

impl From<FindServiceClassUserOptions> for CompositeFindRequest {
	fn from(options: FindServiceClassUserOptions) -> Self {
		Self {
			identifier: options.identifier,
			message_id: options.message_id,
			priority: options.priority,
			affected_sop_class_uid: UI::from(options.query_information_model.as_find_sop_class()),
		}
	}
}

impl FindServiceClassUser {
	pub const fn new(calling_aet: AE, node: DicomNodeConfig, timeout: Duration) -> Self {
		Self {
			calling_aet,
			node,
			timeout,
		}
	}

	#[instrument(skip_all, name = "FIND-SCU", fields(aet = %self.node.aet))]
	pub async fn invoke(
		&self,
		options: FindServiceClassUserOptions,
	) -> Result<Vec<InMemDicomObject>, FindError> {
		let association = ClientAssociation::new(ClientAssociationOptions {
			calling_aet: self.calling_aet.clone(),
			called_aet: self.node.aet.clone(),
			abstract_syntax: UI::from(options.query_information_model.as_find_sop_class()),
			transfer_syntaxes: vec![
				UI::from(uids::EXPLICIT_VR_LITTLE_ENDIAN),
				UI::from(uids::IMPLICIT_VR_LITTLE_ENDIAN),
			],
			address: self.node.address(),
			timeout: self.timeout,
		})
		.await?;
		debug!(backend_uuid = association.uuid().to_string(), "Established association");

		find(&association, CompositeFindRequest::from(options), self.timeout).await
	}
}

/// Runs the C-FIND protocol on an established association.
pub(crate) async fn find<A: Association>(
	association: &A,
	request: CompositeFindRequest,
	timeout: Duration,
) -> Result<Vec<InMemDicomObject>, FindError> {
	association.write_message(request, timeout).await?;
	trace!("Sent C-FIND-RQ");

	let mut identifiers = Vec::new();
	loop {
		let response = association.read_message(timeout).await?;
		let response = CompositeFindResponse::try_from(response)?;
		trace!(status = response.status, "Received C-FIND-RSP");

		match StatusType::classify(response.status) {
			StatusType::Pending => {
				if let Some(data) = response.data {
					identifiers.push(data);
				}
			}
			StatusType::Success => break,
			StatusType::Warning => {
				warn!(status = response.status, "C-FIND completed with warning");
				break;
			}
			StatusType::Failure | StatusType::Cancel => {
				return Err(FindError::Status {
					status: response.status,
					comment: response.error_comment,
				});
			}
		}
	}
	debug!(results = identifiers.len(), "C-FIND completed");
	Ok(identifiers)
}

#[async_trait]
impl FindTransport for FindServiceClassUser {
	async fn send_find(
		&self,
		model: QueryInformationModel,
		identifier: InMemDicomObject,
	) -> Result<Vec<InMemDicomObject>, TransportError> {
		let options = FindServiceClassUserOptions {
			query_information_model: model,
			identifier,
			message_id: next_message_id(),
			priority: PRIORITY_MEDIUM,
		};
		self.invoke(options).await.map_err(Into::into)
	}
}

#[derive(Debug, Error)]
pub enum FindError {
	#[error(transparent)]
	Read(#[from] ReadError),
	#[error(transparent)]
	Write(#[from] WriteError),
	#[error(transparent)]
	Association(#[from] AssociationError),
	#[error("C-FIND failed with status 0x{status:04X}{}", with_comment(.comment))]
	Status { status: US, comment: Option<String> },
}

pub(crate) fn with_comment(comment: &Option<String>) -> String {
	comment
		.as_deref()
		.map(|comment| format!(": {comment}"))
		.unwrap_or_default()
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
	use dicom::transfer_syntax::entries::IMPLICIT_VR_LITTLE_ENDIAN;
	use dicom::ul::pdu::{PDataValue, PDataValueType};
	use dicom::ul::Pdu;
	use pretty_assertions::assert_eq;

	const TIMEOUT: Duration = Duration::from_secs(1);

	fn pdu(value_type: PDataValueType, object: &InMemDicomObject) -> Pdu {
		let mut data = Vec::new();
		object
			.write_dataset_with_ts(&mut data, &IMPLICIT_VR_LITTLE_ENDIAN.erased())
			.unwrap();
		Pdu::PData {
			data: vec![PDataValue {
				value_type,
				presentation_context_id: 1,
				is_last: true,
				data,
			}],
		}
	}

	fn response(status: US, identifier: Option<&str>) -> Vec<Pdu> {
		let data_set_type = if identifier.is_some() { 0x0000 } else { DATA_SET_MISSING };
		let command = InMemDicomObject::command_from_element_iter([
			DataElement::new(tags::COMMAND_FIELD, VR::US, dicom_value!(U16, [0x8020])),
			DataElement::new(tags::STATUS, VR::US, dicom_value!(U16, [status])),
			DataElement::new(tags::COMMAND_DATA_SET_TYPE, VR::US, dicom_value!(U16, [data_set_type])),
		]);
		let mut pdus = vec![pdu(PDataValueType::Command, &command)];
		if let Some(patient_id) = identifier {
			let data = InMemDicomObject::from_element_iter([DataElement::new(
				tags::PATIENT_ID,
				VR::LO,
				PrimitiveValue::from(patient_id),
			)]);
			pdus.push(pdu(PDataValueType::Data, &data));
		}
		pdus
	}

	fn request() -> CompositeFindRequest {
		CompositeFindRequest::from(FindServiceClassUserOptions {
			query_information_model: QueryInformationModel::Patient,
			identifier: InMemDicomObject::new_empty(),
			message_id: 1,
			priority: PRIORITY_MEDIUM,
		})
	}

	#[tokio::test]
	async fn collects_pending_identifiers_until_success() {
		let association = ScriptedAssociation::new(
			[
				response(0xFF00, Some("P1")),
				response(0xFF01, Some("P2")),
				response(0x0000, None),
			]
			.into_iter()
			.flatten(),
		);

		let identifiers = find(&association, request(), TIMEOUT).await.unwrap();

		let ids: Vec<String> = identifiers
			.iter()
			.map(|identifier| identifier.get(tags::PATIENT_ID).unwrap().to_str().unwrap().into_owned())
			.collect();
		assert_eq!(ids, vec![String::from("P1"), String::from("P2")]);
		assert_eq!(association.sent.lock().unwrap().len(), 2);
	}

	#[tokio::test]
	async fn failure_status_is_an_error() {
		let association = ScriptedAssociation::new(
			[response(0xFF00, Some("P1")), response(0xA700, None)]
				.into_iter()
				.flatten(),
		);

		let result = find(&association, request(), TIMEOUT).await;

		assert!(matches!(result, Err(FindError::Status { status: 0xA700, .. })));
	}

	#[tokio::test]
	async fn cancel_status_is_an_error() {
		let association = ScriptedAssociation::new(response(0xFE00, None));

		let result = find(&association, request(), TIMEOUT).await;

		assert!(matches!(result, Err(FindError::Status { status: 0xFE00, .. })));
	}

	#[test]
	fn status_error_mentions_the_comment() {
		let error = FindError::Status {
			status: 0xC001,
			comment: Some(String::from("Unable to process")),
		};

		assert_eq!(error.to_string(), "C-FIND failed with status 0xC001: Unable to process");
	}
}
