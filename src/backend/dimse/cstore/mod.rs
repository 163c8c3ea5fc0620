pub mod storescp;

use crate::backend::dimse::{DicomMessage, ReadError, DATA_SET_MISSING};
use crate::types::{UI, US};
use dicom::core::{DataElement, VR};
use dicom::dicom_value;
use dicom::dictionary_std::tags;
use dicom::object::{InMemDicomObject, Tag};

// Magic numbers defined by the DICOM specification.
pub const COMMAND_FIELD_COMPOSITE_STORE_REQUEST: US = 0x0001;
pub const COMMAND_FIELD_COMPOSITE_STORE_RESPONSE: US = 0x8001;

pub const STATUS_SUCCESS: US = 0x0000;
/// Refused: Out of Resources
pub const STATUS_OUT_OF_RESOURCES: US = 0xA700;

/// C-STORE-RQ as received by the Store SCP.
/// <https://dicom.nema.org/medical/dicom/current/output/chtml/part07/sect_9.3.html#sect_9.3.1.1>
#[derive(Debug)]
pub struct CompositeStoreRequest {
	pub message_id: US,
	pub affected_sop_class_uid: UI,
	pub affected_sop_instance_uid: UI,
	pub move_originator_message_id: Option<US>,
	pub presentation_context_id: Option<u8>,
	pub data_set: InMemDicomObject,
}

fn command_uid(message: &DicomMessage, tag: Tag) -> Result<UI, ReadError> {
	message
		.command
		.get(tag)
		.and_then(|element| element.to_str().ok())
		.map(|uid| UI::from(uid.trim_end_matches(['\0', ' '])))
		.ok_or(ReadError::MissingAttribute(tag))
}

impl TryFrom<DicomMessage> for CompositeStoreRequest {
	type Error = ReadError;

	fn try_from(message: DicomMessage) -> Result<Self, Self::Error> {
		let command_field = message
			.command_u16(tags::COMMAND_FIELD)
			.ok_or(ReadError::MissingAttribute(tags::COMMAND_FIELD))?;
		if command_field != COMMAND_FIELD_COMPOSITE_STORE_REQUEST {
			return Err(ReadError::UnexpectedCommand(command_field));
		}

		let affected_sop_class_uid = command_uid(&message, tags::AFFECTED_SOP_CLASS_UID)?;
		let affected_sop_instance_uid = command_uid(&message, tags::AFFECTED_SOP_INSTANCE_UID)?;
		Ok(Self {
			message_id: message.command_u16(tags::MESSAGE_ID).unwrap_or(0),
			move_originator_message_id: message.command_u16(tags::MOVE_ORIGINATOR_MESSAGE_ID),
			presentation_context_id: message.presentation_context_id,
			data_set: message.data.ok_or(ReadError::MissingDataSet)?,
			affected_sop_class_uid,
			affected_sop_instance_uid,
		})
	}
}

/// C-STORE-RSP
pub struct CompositeStoreResponse {
	pub message_id: US,
	pub sop_class_uid: UI,
	pub sop_instance_uid: UI,
	pub status: US,
	pub presentation_context_id: Option<u8>,
}

impl CompositeStoreResponse {
	pub fn to(request: &CompositeStoreRequest, status: US) -> Self {
		Self {
			message_id: request.message_id,
			sop_class_uid: request.affected_sop_class_uid.clone(),
			sop_instance_uid: request.affected_sop_instance_uid.clone(),
			status,
			presentation_context_id: request.presentation_context_id,
		}
	}
}

impl From<CompositeStoreResponse> for DicomMessage {
	#[rustfmt::skip]
	fn from(response: CompositeStoreResponse) -> Self {
		let command = InMemDicomObject::command_from_element_iter([
			DataElement::new(tags::AFFECTED_SOP_CLASS_UID, VR::UI, dicom_value!(Str, response.sop_class_uid)),
			DataElement::new(tags::COMMAND_FIELD, VR::US, dicom_value!(U16, [COMMAND_FIELD_COMPOSITE_STORE_RESPONSE])),
			DataElement::new(tags::MESSAGE_ID_BEING_RESPONDED_TO, VR::US, dicom_value!(U16, [response.message_id])),
			DataElement::new(tags::COMMAND_DATA_SET_TYPE, VR::US, dicom_value!(U16, [DATA_SET_MISSING])),
			DataElement::new(tags::STATUS, VR::US, dicom_value!(U16, [response.status])),
			DataElement::new(tags::AFFECTED_SOP_INSTANCE_UID, VR::UI, dicom_value!(Str, response.sop_instance_uid)),
		]);

		Self {
			command,
			data: None,
			presentation_context_id: response.presentation_context_id,
		}
	}
}

/// An instance received by the Store SCP.
#[derive(Debug, Clone)]
pub struct ReceivedInstance {
	pub sop_class_uid: UI,
	pub sop_instance_uid: UI,
	pub data: InMemDicomObject,
}

impl From<CompositeStoreRequest> for ReceivedInstance {
	fn from(request: CompositeStoreRequest) -> Self {
		Self {
			sop_class_uid: request.affected_sop_class_uid,
			sop_instance_uid: request.affected_sop_instance_uid,
			data: request.data_set,
		}
	}
}
