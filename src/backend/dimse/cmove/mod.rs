use crate::backend::dimse::{DicomMessage, ReadError, DATA_SET_EXISTS};
use crate::types::{QueryInformationModel, QueryRetrieveLevel, AE, PRIORITY_MEDIUM, US};
use dicom::core::{DataElement, PrimitiveValue, VR};
use dicom::dicom_value;
use dicom::dictionary_std::tags;
use dicom::object::InMemDicomObject;

pub mod movescu;

// Magic numbers defined by the DICOM specification.
pub const COMMAND_FIELD_COMPOSITE_MOVE_REQUEST: US = 0x0021;

/// Retrieval always uses the Study Root information model.
pub const MOVE_SOP_CLASS: &str = QueryInformationModel::Study.as_move_sop_class();

/// C-MOVE-RQ
pub struct CompositeMoveRequest {
	pub identifier: InMemDicomObject,
	pub message_id: US,
	pub priority: US,
	pub destination: AE,
}

impl CompositeMoveRequest {
	pub fn new(message_id: US, destination: AE) -> Self {
		Self {
			identifier: InMemDicomObject::new_empty(),
			priority: PRIORITY_MEDIUM,
			message_id,
			destination,
		}
	}

	pub fn identifier(mut self, identifier: InMemDicomObject) -> Self {
		self.identifier = identifier;
		self
	}

	/// Moves all instances of a study.
	pub fn study(self, study_instance_uid: &str) -> Self {
		self.identifier(InMemDicomObject::from_element_iter([
			DataElement::new(tags::QUERY_RETRIEVE_LEVEL, VR::CS, PrimitiveValue::from(QueryRetrieveLevel::Study)),
			DataElement::new(tags::STUDY_INSTANCE_UID, VR::UI, PrimitiveValue::from(study_instance_uid)),
		]))
	}

	/// Moves all instances of a series. The study UID is the unique key of the parent level.
	pub fn series(self, study_instance_uid: Option<&str>, series_instance_uid: &str) -> Self {
		let mut identifier = InMemDicomObject::from_element_iter([
			DataElement::new(tags::QUERY_RETRIEVE_LEVEL, VR::CS, PrimitiveValue::from(QueryRetrieveLevel::Series)),
			DataElement::new(tags::SERIES_INSTANCE_UID, VR::UI, PrimitiveValue::from(series_instance_uid)),
		]);
		if let Some(study_instance_uid) = study_instance_uid {
			identifier.put(DataElement::new(
				tags::STUDY_INSTANCE_UID,
				VR::UI,
				PrimitiveValue::from(study_instance_uid),
			));
		}
		self.identifier(identifier)
	}

	/// Moves a single instance, identified by the unique keys of all levels.
	pub fn instance(self, study_instance_uid: &str, series_instance_uid: &str, sop_instance_uid: &str) -> Self {
		self.identifier(InMemDicomObject::from_element_iter([
			DataElement::new(tags::QUERY_RETRIEVE_LEVEL, VR::CS, PrimitiveValue::from(QueryRetrieveLevel::Image)),
			DataElement::new(tags::STUDY_INSTANCE_UID, VR::UI, PrimitiveValue::from(study_instance_uid)),
			DataElement::new(tags::SERIES_INSTANCE_UID, VR::UI, PrimitiveValue::from(series_instance_uid)),
			DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from(sop_instance_uid)),
		]))
	}
}

impl From<CompositeMoveRequest> for DicomMessage {
	#[rustfmt::skip]
	fn from(request: CompositeMoveRequest) -> Self {
		let command = InMemDicomObject::command_from_element_iter([
			DataElement::new(tags::AFFECTED_SOP_CLASS_UID, VR::UI, dicom_value!(Str, MOVE_SOP_CLASS)),
			DataElement::new(tags::COMMAND_FIELD, VR::US, dicom_value!(U16, [COMMAND_FIELD_COMPOSITE_MOVE_REQUEST])),
			DataElement::new(tags::MESSAGE_ID, VR::US, dicom_value!(U16, [request.message_id])),
			DataElement::new(tags::PRIORITY, VR::US, dicom_value!(U16, [request.priority])),
			DataElement::new(tags::MOVE_DESTINATION, VR::AE, dicom_value!(Str, request.destination)),
			DataElement::new(tags::COMMAND_DATA_SET_TYPE, VR::US, dicom_value!(U16, [DATA_SET_EXISTS])),
		]);

		Self {
			command,
			data: Some(request.identifier),
			presentation_context_id: None,
		}
	}
}

/// C-MOVE-RSP
/// <https://dicom.nema.org/medical/dicom/current/output/chtml/part07/sect_9.3.4.2.html>
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CompositeMoveResponse {
	pub status: US,
	pub remaining: Option<US>,
	pub completed: Option<US>,
	pub failed: Option<US>,
	pub warning: Option<US>,
	pub error_comment: Option<String>,
}

impl TryFrom<DicomMessage> for CompositeMoveResponse {
	type Error = ReadError;

	fn try_from(message: DicomMessage) -> Result<Self, Self::Error> {
		Ok(Self {
			status: message.status()?,
			remaining: message.command_u16(tags::NUMBER_OF_REMAINING_SUBOPERATIONS),
			completed: message.command_u16(tags::NUMBER_OF_COMPLETED_SUBOPERATIONS),
			failed: message.command_u16(tags::NUMBER_OF_FAILED_SUBOPERATIONS),
			warning: message.command_u16(tags::NUMBER_OF_WARNING_SUBOPERATIONS),
			error_comment: message.error_comment(),
		})
	}
}
