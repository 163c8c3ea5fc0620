use crate::query::preset::ResolvedFields;
use dicom::core::dictionary::DataDictionaryEntry;
use dicom::core::{DataDictionary, DicomValue, PrimitiveValue, Tag};
use dicom::object::mem::InMemElement;
use dicom::object::{InMemDicomObject, StandardDataDictionary};
use serde::Serialize;
use std::collections::BTreeMap;

/// The normalized value of a single attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
	/// A single value. Present but empty attributes are an empty string.
	Text(String),
	/// All values of a multi-valued attribute, in order.
	Multi(Vec<String>),
	/// The items of a sequence attribute.
	Items(Vec<ResultRecord>),
}

/// One entity returned by a query, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ResultRecord(BTreeMap<String, FieldValue>);

impl ResultRecord {
	pub fn get(&self, field: &str) -> Option<&FieldValue> {
		self.0.get(field)
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn fields(&self) -> impl Iterator<Item = &str> {
		self.0.keys().map(String::as_str)
	}

	pub fn insert(&mut self, field: impl Into<String>, value: FieldValue) {
		self.0.insert(field.into(), value);
	}
}

/// Projects a returned identifier onto the resolved field set.
///
/// Fields missing from the identifier are omitted.
pub fn normalize(raw: &InMemDicomObject, fields: &ResolvedFields) -> ResultRecord {
	let mut record = ResultRecord::default();
	for field in fields.iter() {
		if let Some(element) = raw.get(field.tag()) {
			record.insert(field.name(), field_value(element));
		}
	}
	record
}

fn field_value(element: &InMemElement) -> FieldValue {
	match element.value() {
		DicomValue::Primitive(value) => primitive_value(value),
		DicomValue::Sequence(sequence) => {
			FieldValue::Items(sequence.items().iter().map(item_record).collect())
		}
		// Encapsulated pixel data is never a query result
		DicomValue::PixelSequence(_) => FieldValue::Text(String::new()),
	}
}

fn primitive_value(value: &PrimitiveValue) -> FieldValue {
	let values: Vec<String> = value
		.to_multi_str()
		.iter()
		.map(|s| s.trim_end_matches(['\0', ' ']).trim_start().to_owned())
		.collect();

	match values.len() {
		0 => FieldValue::Text(String::new()),
		1 => FieldValue::Text(values.into_iter().next().unwrap_or_default()),
		_ => FieldValue::Multi(values),
	}
}

/// Sequence items are not restricted to the resolved field set.
fn item_record(item: &InMemDicomObject) -> ResultRecord {
	let mut record = ResultRecord::default();
	for element in item.iter() {
		record.insert(field_name(element.header().tag), field_value(element));
	}
	record
}

fn field_name(tag: Tag) -> String {
	StandardDataDictionary.by_tag(tag).map_or_else(
		|| format!("{:04X}{:04X}", tag.group(), tag.element()),
		|entry| entry.alias().to_owned(),
	)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::query::catalog::{AttributeCatalog, QueryLevel, Tier};
	use crate::query::preset::{resolve, PresetSelection, ResolvedField};
	use dicom::core::value::DataSetSequence;
	use dicom::core::{dicom_value, DataElement, Length, VR};
	use dicom::dictionary_std::tags;
	use pretty_assertions::assert_eq;

	fn text(value: &str) -> FieldValue {
		FieldValue::Text(value.to_owned())
	}

	fn series_response() -> InMemDicomObject {
		InMemDicomObject::from_element_iter([
			DataElement::new(tags::QUERY_RETRIEVE_LEVEL, VR::CS, PrimitiveValue::from("SERIES")),
			DataElement::new(tags::SERIES_INSTANCE_UID, VR::UI, PrimitiveValue::from("1.2.3.4\0")),
			DataElement::new(tags::MODALITY, VR::CS, PrimitiveValue::from("CT")),
			DataElement::new(tags::SERIES_DESCRIPTION, VR::LO, PrimitiveValue::Empty),
			DataElement::new(tags::SERIES_NUMBER, VR::IS, PrimitiveValue::from("3 ")),
			DataElement::new(tags::IMAGE_TYPE, VR::CS, dicom_value!(Strs, ["ORIGINAL", "PRIMARY", "AXIAL"])),
		])
	}

	#[test]
	fn projects_onto_the_resolved_fields() {
		let catalog = AttributeCatalog::standard();
		let fields = resolve(
			&catalog,
			QueryLevel::Series,
			&PresetSelection::new(Tier::Minimal).include(["ImageType", "BodyPartExamined"]),
		)
		.unwrap();

		let record = normalize(&series_response(), &fields);

		assert_eq!(record.get("SeriesInstanceUID"), Some(&text("1.2.3.4")));
		assert_eq!(record.get("Modality"), Some(&text("CT")));
		assert_eq!(record.get("SeriesNumber"), Some(&text("3")));
		assert_eq!(record.get("QueryRetrieveLevel"), None);
	}

	#[test]
	fn absent_fields_are_omitted_and_empty_fields_kept() {
		let catalog = AttributeCatalog::standard();
		let fields = resolve(
			&catalog,
			QueryLevel::Series,
			&PresetSelection::new(Tier::Standard).include(["BodyPartExamined"]),
		)
		.unwrap();

		let record = normalize(&series_response(), &fields);

		assert_eq!(record.get("SeriesDescription"), Some(&text("")));
		assert!(fields.contains("BodyPartExamined"));
		assert_eq!(record.get("BodyPartExamined"), None);
	}

	#[test]
	fn multi_valued_fields_keep_their_order() {
		let catalog = AttributeCatalog::standard();
		let fields = resolve(
			&catalog,
			QueryLevel::Series,
			&PresetSelection::new(Tier::Minimal).include(["ImageType"]),
		)
		.unwrap();

		let record = normalize(&series_response(), &fields);

		assert_eq!(
			record.get("ImageType"),
			Some(&FieldValue::Multi(vec![
				String::from("ORIGINAL"),
				String::from("PRIMARY"),
				String::from("AXIAL"),
			]))
		);
	}

	#[test]
	fn returns_exactly_the_present_resolved_fields() {
		let catalog = AttributeCatalog::standard();
		let fields = resolve(&catalog, QueryLevel::Series, &PresetSelection::new(Tier::Extended)).unwrap();

		let record = normalize(&series_response(), &fields);

		let raw = series_response();
		let mut expected: Vec<&str> = fields
			.iter()
			.filter(|field| raw.get(field.tag()).is_some())
			.map(ResolvedField::name)
			.collect();
		let mut actual: Vec<&str> = record.fields().collect();
		actual.sort_unstable();
		expected.sort_unstable();
		assert_eq!(actual, expected);
	}

	#[test]
	fn sequences_become_nested_records() {
		let item = InMemDicomObject::from_element_iter([
			DataElement::new(tags::REFERENCED_SOP_CLASS_UID, VR::UI, PrimitiveValue::from("1.2.840.10008.3.1.2.3.1")),
			DataElement::new(Tag(0x0009, 0x1001), VR::LO, PrimitiveValue::from("private")),
		]);
		let raw = InMemDicomObject::from_element_iter([DataElement::new(
			tags::REFERENCED_PERFORMED_PROCEDURE_STEP_SEQUENCE,
			VR::SQ,
			DicomValue::Sequence(DataSetSequence::new(vec![item], Length::UNDEFINED)),
		)]);
		let catalog = AttributeCatalog::standard();
		let fields = resolve(
			&catalog,
			QueryLevel::Series,
			&PresetSelection::new(Tier::Minimal)
				.include(["ReferencedPerformedProcedureStepSequence"]),
		)
		.unwrap();

		let record = normalize(&raw, &fields);

		let mut nested = ResultRecord::default();
		nested.insert("ReferencedSOPClassUID", text("1.2.840.10008.3.1.2.3.1"));
		nested.insert("00091001", text("private"));
		assert_eq!(
			record.get("ReferencedPerformedProcedureStepSequence"),
			Some(&FieldValue::Items(vec![nested]))
		);
	}

	#[test]
	fn serializes_as_plain_json() {
		let mut record = ResultRecord::default();
		record.insert("PatientName", text("DOE^JANE"));
		record.insert(
			"ModalitiesInStudy",
			FieldValue::Multi(vec![String::from("CT"), String::from("MR")]),
		);

		assert_eq!(
			serde_json::to_value(&record).unwrap(),
			serde_json::json!({ "ModalitiesInStudy": ["CT", "MR"], "PatientName": "DOE^JANE" })
		);
	}
}
