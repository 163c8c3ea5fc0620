//! Text extraction from Encapsulated PDF instances.

use dicom::dictionary_std::{tags, uids};
use dicom::object::InMemDicomObject;
use serde::Serialize;
use std::panic;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PdfError {
	#[error("Retrieved DICOM instance does not contain an encapsulated PDF")]
	NotAPdf,
	#[error("Encapsulated PDF instance has no EncapsulatedDocument")]
	MissingDocument,
	#[error("Failed to extract text from PDF: {0}")]
	Extract(String),
}

/// Result of the `extract_pdf_text_from_dicom` tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PdfText {
	pub success: bool,
	pub message: String,
	pub text_content: String,
	pub sop_instance_uid: String,
}

impl PdfText {
	pub fn failed(sop_instance_uid: &str, message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
			sop_instance_uid: sop_instance_uid.to_owned(),
			..Self::default()
		}
	}
}

/// The PDF document of an Encapsulated PDF instance.
pub fn encapsulated_document(instance: &InMemDicomObject) -> Result<Vec<u8>, PdfError> {
	let sop_class_uid = instance
		.get(tags::SOP_CLASS_UID)
		.and_then(|element| element.to_str().ok())
		.ok_or(PdfError::NotAPdf)?;
	if sop_class_uid.trim_end_matches(['\0', ' ']) != uids::ENCAPSULATED_PDF_STORAGE {
		return Err(PdfError::NotAPdf);
	}

	let mut document = instance
		.get(tags::ENCAPSULATED_DOCUMENT)
		.and_then(|element| element.to_bytes().ok())
		.ok_or(PdfError::MissingDocument)?
		.into_owned();
	// OB values are padded to an even length
	let length = instance
		.get(tags::ENCAPSULATED_DOCUMENT_LENGTH)
		.and_then(|element| element.to_int::<u32>().ok())
		.and_then(|length| usize::try_from(length).ok());
	if let Some(length) = length {
		document.truncate(length);
	}
	if document.is_empty() {
		return Err(PdfError::MissingDocument);
	}
	Ok(document)
}

/// Extracts the text of all pages. This is CPU-bound and belongs on a blocking thread.
pub fn extract_text(instance: &InMemDicomObject) -> Result<String, PdfError> {
	let document = encapsulated_document(instance)?;
	// pdf-extract panics on some malformed documents
	panic::catch_unwind(|| pdf_extract::extract_text_from_mem(&document))
		.map_err(|_| PdfError::Extract(String::from("the PDF parser failed on a malformed document")))?
		.map_err(|err| PdfError::Extract(err.to_string()))
}
