//! This module contains the DIMSE backend.
//! - Queries are implemented as a find service class user (C-FIND service).
//! - Retrieval to another node is implemented as a move service class user (C-MOVE service).
//! - Connection checks are implemented as a verification service class user (C-ECHO service).
//! - Instances moved to this server are received by a storage service class provider (C-STORE service).

pub mod association;
pub mod cecho;
pub mod cfind;
pub mod cmove;
pub mod cstore;
pub mod retrieve;

use crate::types::{UI, US};
use association::{Association, AssociationError};
use dicom::dictionary_std::tags;
use dicom::encoding::TransferSyntaxIndex;
use dicom::object::mem::InMemElement;
use dicom::object::{InMemDicomObject, Tag};
use dicom::transfer_syntax::entries::IMPLICIT_VR_LITTLE_ENDIAN;
use dicom::transfer_syntax::TransferSyntaxRegistry;
use dicom::ul::pdu::{PDataValue, PDataValueType};
use dicom::ul::Pdu;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{instrument, trace};

/// Should be set for [`tags::COMMAND_DATA_SET_TYPE`] if a DICOM message contains a data set.
/// For reading DICOM messages, prefer checking if (command_data_set_type != DATA_SET_MISSING) as
/// AEs are free to choose another value for a truthy state.
pub const DATA_SET_EXISTS: US = 0x0102;
/// Should be set for [`tags::COMMAND_DATA_SET_TYPE`] if a DICOM message has no data set.
pub const DATA_SET_MISSING: US = 0x0101; // DICOM NULL

/// Represents a DICOM message composed of a command set followed by an optional data set.
/// <https://dicom.nema.org/medical/dicom/current/output/chtml/part07/sect_6.3.html>
pub struct DicomMessage {
	/// The command set.
	pub command: InMemDicomObject,
	/// The data set.
	pub data: Option<InMemDicomObject>,
	/// The presentation context id
	pub presentation_context_id: Option<u8>,
}

impl Debug for DicomMessage {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		if self.data.is_some() {
			write!(f, "DicomMessage {{ command, data }}")
		} else {
			write!(f, "DicomMessage {{ command }}")
		}
	}
}

impl DicomMessage {
	/// Reads an unsigned short attribute from the command set.
	pub fn command_u16(&self, tag: Tag) -> Option<US> {
		self.command
			.get(tag)
			.map(InMemElement::to_int::<US>)
			.and_then(Result::ok)
	}

	/// The Status attribute of a response message.
	pub fn status(&self) -> Result<US, ReadError> {
		self.command_u16(tags::STATUS)
			.ok_or(ReadError::MissingAttribute(tags::STATUS))
	}

	/// The Error Comment attribute of a response message, if present.
	pub fn error_comment(&self) -> Option<String> {
		self.command
			.get(tags::ERROR_COMMENT)
			.and_then(|element| element.to_str().ok())
			.map(|comment| comment.trim().to_owned())
			.filter(|comment| !comment.is_empty())
	}
}

/// Status types supported by the DIMSE services.
/// <https://dicom.nema.org/medical/dicom/current/output/chtml/part07/chapter_C.html>
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusType {
	Success,
	Warning,
	Failure,
	Cancel,
	Pending,
}

impl TryFrom<u16> for StatusType {
	type Error = u16;

	/// <https://dicom.nema.org/medical/dicom/current/output/chtml/part07/chapter_C.html>
	fn try_from(value: u16) -> Result<Self, Self::Error> {
		match value {
			0 => Ok(Self::Success),
			1 | 0x0107 | 0x0116 | 0xB000..=0xBFFF => Ok(Self::Warning),
			0xA000..=0xAFFF | 0xC000..=0xCFFF | 0x0100..=0x01FF | 0x0200..=0x02FF => {
				Ok(Self::Failure)
			}
			0xFE00 => Ok(Self::Cancel),
			0xFF00 | 0xFF01 => Ok(Self::Pending),
			_ => Err(value),
		}
	}
}

impl StatusType {
	/// Classifies a status code. Unknown codes are failures.
	pub fn classify(status: US) -> Self {
		Self::try_from(status).unwrap_or(Self::Failure)
	}
}

pub trait DicomMessageReader {
	async fn read_message(&self, timeout: Duration) -> Result<DicomMessage, ReadError>;
}

pub trait DicomMessageWriter {
	async fn write_message(
		&self,
		message: impl Into<DicomMessage>,
		timeout: Duration,
	) -> Result<(), WriteError>;
}

impl<A: Association> DicomMessageWriter for A {
	#[instrument(skip_all)]
	async fn write_message(
		&self,
		message: impl Into<DicomMessage>,
		timeout: Duration,
	) -> Result<(), WriteError> {
		let message: DicomMessage = Into::into(message);

		let presentation_context = match message.presentation_context_id {
			None => self.presentation_contexts().first(),
			Some(presentation_context_id) => self
				.presentation_contexts()
				.iter()
				.find(|pctx| pctx.id == presentation_context_id),
		}
		.ok_or(NegotiationError::NoPresentationContext)?;

		let mut command_buf = Vec::new();
		message
			.command
			.write_dataset_with_ts(&mut command_buf, &IMPLICIT_VR_LITTLE_ENDIAN.erased())?;

		let command_pdu = Pdu::PData {
			data: vec![PDataValue {
				value_type: PDataValueType::Command,
				presentation_context_id: presentation_context.id,
				is_last: true,
				data: command_buf,
			}],
		};
		self.send(command_pdu, timeout).await?;

		if let Some(data) = message.data {
			let transfer_syntax = TransferSyntaxRegistry
				.get(&presentation_context.transfer_syntax)
				.ok_or_else(|| {
					NegotiationError::UnknownTransferSyntax(UI::from(
						&presentation_context.transfer_syntax,
					))
				})?;
			let mut data_buf = Vec::new();
			data.write_dataset_with_ts(&mut data_buf, transfer_syntax)?;

			let data_pdu = Pdu::PData {
				data: vec![PDataValue {
					value_type: PDataValueType::Data,
					presentation_context_id: presentation_context.id,
					is_last: true,
					data: data_buf,
				}],
			};

			self.send(data_pdu, timeout).await?;
		}

		Ok(())
	}
}

#[derive(Debug, Error)]
pub enum ReadError {
	#[error("Failed to read DICOM object: {0}")]
	Reader(#[from] dicom::object::ReadError),
	#[error("Received unexpected PDU {0:?}")]
	UnexpectedPdu(Box<Pdu>),
	#[error("Received fragments out of order")]
	OutOfOrder,
	#[error("Failed to receive PDU: {0}")]
	Association(#[from] AssociationError),
	#[error(transparent)]
	Negotiation(#[from] NegotiationError),
	#[error("Mandatory attribute {0} is missing")]
	MissingAttribute(Tag),
	#[error("Received unexpected command 0x{0:04X}")]
	UnexpectedCommand(US),
	#[error("Message has no data set")]
	MissingDataSet,
}

#[derive(Debug, Error)]
pub enum WriteError {
	#[error("Failed to write DICOM object: {0}")]
	Writer(#[from] dicom::object::WriteError),
	#[error("Failed to send PDU: {0}")]
	Association(#[from] AssociationError),
	#[error(transparent)]
	Negotiation(#[from] NegotiationError),
}

#[derive(Debug, Error)]
pub enum NegotiationError {
	#[error("Unknown transfer syntax with UID '{0}'")]
	UnknownTransferSyntax(UI),
	#[error("Failed to negotiate a presentation context")]
	NoPresentationContext,
}

impl<A: Association> DicomMessageReader for A {
	#[instrument(skip_all)]
	async fn read_message(&self, timeout: Duration) -> Result<DicomMessage, ReadError> {
		let mut command_fragments = Vec::new();
		let mut data_fragments = Vec::new();
		let mut message_command: Option<InMemDicomObject> = None;

		loop {
			let pdu = self.receive(timeout).await?;
			let Pdu::PData { data } = pdu else {
				return Err(ReadError::UnexpectedPdu(Box::new(pdu)));
			};
			for mut pdv in data {
				match pdv.value_type {
					PDataValueType::Command => {
						trace!("Received command fragment (last={})", pdv.is_last);
						if message_command.is_some() {
							// The full command set was already received
							return Err(ReadError::OutOfOrder);
						}
						command_fragments.append(&mut pdv.data);
						if pdv.is_last {
							let command = InMemDicomObject::read_dataset_with_ts(
								command_fragments.as_slice(),
								&IMPLICIT_VR_LITTLE_ENDIAN.erased(),
							)?;
							let has_data_set = command
								.get(tags::COMMAND_DATA_SET_TYPE)
								.map(InMemElement::to_int::<US>)
								.and_then(Result::ok)
								.is_some_and(|value| value != DATA_SET_MISSING);

							if has_data_set {
								message_command = Some(command);
							} else {
								return Ok(DicomMessage {
									command,
									data: None,
									presentation_context_id: Some(pdv.presentation_context_id),
								});
							}
						}
					}
					PDataValueType::Data => {
						trace!("Received data fragment (last={})", pdv.is_last);
						data_fragments.append(&mut pdv.data);
						if pdv.is_last {
							// Data fragments are only valid after the entire command set
							let Some(command) = message_command else {
								return Err(ReadError::OutOfOrder);
							};
							let presentation_context = self
								.presentation_contexts()
								.iter()
								.find(|pctx| pctx.id == pdv.presentation_context_id)
								.ok_or(NegotiationError::NoPresentationContext)?;
							let transfer_syntax = TransferSyntaxRegistry
								.get(&presentation_context.transfer_syntax)
								.ok_or_else(|| {
									NegotiationError::UnknownTransferSyntax(UI::from(
										&presentation_context.transfer_syntax,
									))
								})?;
							let data = InMemDicomObject::read_dataset_with_ts(
								data_fragments.as_slice(),
								transfer_syntax,
							)?;

							return Ok(DicomMessage {
								command,
								data: Some(data),
								presentation_context_id: Some(pdv.presentation_context_id),
							});
						}
					}
				}
			}
		}
	}
}

/// Returns a new message id by incrementing a global counter.
pub fn next_message_id() -> US {
	static CURRENT_MSG_ID: AtomicU16 = AtomicU16::new(1);
	CURRENT_MSG_ID.fetch_add(1, Ordering::SeqCst)
}


#[cfg(test)]
mod tests {
	use super::testing::ScriptedAssociation;
	use super::*;
	use dicom::core::{DataElement, PrimitiveValue, VR};
	use dicom::dicom_value;

	const TIMEOUT: Duration = Duration::from_secs(1);

	fn encode(object: &InMemDicomObject) -> Vec<u8> {
		let mut buf = Vec::new();
		object
			.write_dataset_with_ts(&mut buf, &IMPLICIT_VR_LITTLE_ENDIAN.erased())
			.unwrap();
		buf
	}

	fn pdata(value_type: PDataValueType, is_last: bool, data: Vec<u8>) -> Pdu {
		Pdu::PData {
			data: vec![PDataValue {
				value_type,
				presentation_context_id: 1,
				is_last,
				data,
			}],
		}
	}

	fn response_command(status: US, data_set_type: US) -> InMemDicomObject {
		InMemDicomObject::command_from_element_iter([
			DataElement::new(tags::COMMAND_FIELD, VR::US, dicom_value!(U16, [0x8020])),
			DataElement::new(tags::STATUS, VR::US, dicom_value!(U16, [status])),
			DataElement::new(tags::COMMAND_DATA_SET_TYPE, VR::US, dicom_value!(U16, [data_set_type])),
		])
	}

	#[test]
	fn classifies_status_codes() {
		assert_eq!(StatusType::classify(0x0000), StatusType::Success);
		assert_eq!(StatusType::classify(0x0001), StatusType::Warning);
		assert_eq!(StatusType::classify(0xB000), StatusType::Warning);
		assert_eq!(StatusType::classify(0xA801), StatusType::Failure);
		assert_eq!(StatusType::classify(0xC000), StatusType::Failure);
		assert_eq!(StatusType::classify(0xFE00), StatusType::Cancel);
		assert_eq!(StatusType::classify(0xFF01), StatusType::Pending);
		assert_eq!(StatusType::classify(0x1234), StatusType::Failure);
	}

	#[tokio::test]
	async fn reassembles_fragmented_messages() {
		let command = encode(&response_command(0xFF00, DATA_SET_EXISTS));
		let identifier = encode(&InMemDicomObject::from_element_iter([DataElement::new(
			tags::PATIENT_ID,
			VR::LO,
			PrimitiveValue::from("P1"),
		)]));
		let (command_head, command_tail) = command.split_at(10);
		let (data_head, data_tail) = identifier.split_at(4);
		let association = ScriptedAssociation::new([
			pdata(PDataValueType::Command, false, command_head.to_vec()),
			pdata(PDataValueType::Command, true, command_tail.to_vec()),
			pdata(PDataValueType::Data, false, data_head.to_vec()),
			pdata(PDataValueType::Data, true, data_tail.to_vec()),
		]);

		let message = association.read_message(TIMEOUT).await.unwrap();

		assert_eq!(message.status().unwrap(), 0xFF00);
		assert_eq!(message.presentation_context_id, Some(1));
		let data = message.data.unwrap();
		assert_eq!(data.get(tags::PATIENT_ID).unwrap().to_str().unwrap(), "P1");
	}

	#[tokio::test]
	async fn command_without_data_set_completes_the_message() {
		let association = ScriptedAssociation::new([pdata(
			PDataValueType::Command,
			true,
			encode(&response_command(0x0000, DATA_SET_MISSING)),
		)]);

		let message = association.read_message(TIMEOUT).await.unwrap();

		assert_eq!(message.status().unwrap(), 0x0000);
		assert!(message.data.is_none());
	}

	#[tokio::test]
	async fn data_before_command_is_rejected() {
		let association = ScriptedAssociation::new([pdata(PDataValueType::Data, true, Vec::new())]);

		let result = association.read_message(TIMEOUT).await;

		assert!(matches!(result, Err(ReadError::OutOfOrder)));
	}

	#[tokio::test]
	async fn non_pdata_is_unexpected() {
		let association = ScriptedAssociation::new([Pdu::ReleaseRP]);

		let result = association.read_message(TIMEOUT).await;

		assert!(matches!(result, Err(ReadError::UnexpectedPdu(_))));
	}

	#[tokio::test]
	async fn writes_command_and_data_set() {
		let association = ScriptedAssociation::new([]);
		let message = DicomMessage {
			command: response_command(0xFF00, DATA_SET_EXISTS),
			data: Some(InMemDicomObject::new_empty()),
			presentation_context_id: None,
		};

		association.write_message(message, TIMEOUT).await.unwrap();

		let sent = association.sent.lock().unwrap();
		assert_eq!(sent.len(), 2);
		assert!(matches!(
			&sent[0],
			Pdu::PData { data } if data[0].value_type == PDataValueType::Command && data[0].is_last
		));
		assert!(matches!(
			&sent[1],
			Pdu::PData { data } if data[0].value_type == PDataValueType::Data
		));
	}

	#[test]
	fn error_comment_is_trimmed() {
		let message = DicomMessage {
			command: InMemDicomObject::command_from_element_iter([DataElement::new(
				tags::ERROR_COMMENT,
				VR::LO,
				PrimitiveValue::from("Unknown destination "),
			)]),
			data: None,
			presentation_context_id: None,
		};

		assert_eq!(message.error_comment().as_deref(), Some("Unknown destination"));
	}
}
