//! Tool arguments. Empty strings are treated like absent values.

use crate::query::builder::QueryCriteria;
use crate::query::catalog::Tier;
use crate::query::preset::PresetSelection;
use crate::query::QueryError;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;

fn standard_preset() -> String {
	String::from(Tier::Standard.as_str())
}

/// Controls which attributes are returned by a query tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct PresetParams {
	/// Attribute preset: "minimal", "standard" or "extended".
	#[serde(default = "standard_preset")]
	pub attribute_preset: String,
	/// Extra attributes to return, as DICOM keywords or "GGGGEEEE" tags.
	#[serde(default)]
	pub additional_attributes: Option<Vec<String>>,
	/// Attributes to drop from the preset.
	#[serde(default)]
	pub exclude_attributes: Option<Vec<String>>,
}

impl Default for PresetParams {
	fn default() -> Self {
		Self {
			attribute_preset: standard_preset(),
			additional_attributes: None,
			exclude_attributes: None,
		}
	}
}

impl PresetParams {
	pub fn selection(&self) -> Result<PresetSelection, QueryError> {
		let tier = match self.attribute_preset.trim() {
			"" => Tier::default(),
			preset => Tier::from_str(preset)?,
		};
		Ok(PresetSelection::new(tier)
			.include(non_blank(self.additional_attributes.as_deref()))
			.exclude(non_blank(self.exclude_attributes.as_deref())))
	}
}

fn non_blank(fields: Option<&[String]>) -> impl Iterator<Item = String> + '_ {
	fields
		.unwrap_or_default()
		.iter()
		.map(|field| field.trim())
		.filter(|field| !field.is_empty())
		.map(String::from)
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct QueryPatientsParams {
	/// Patient name, wildcards allowed (e.g. "SMITH*").
	#[serde(default)]
	pub name_pattern: String,
	#[serde(default)]
	pub patient_id: String,
	/// Birth date as YYYYMMDD or a range YYYYMMDD-YYYYMMDD.
	#[serde(default)]
	pub birth_date: String,
	#[serde(flatten)]
	pub preset: PresetParams,
}

impl QueryPatientsParams {
	pub fn criteria(&self) -> QueryCriteria {
		QueryCriteria::from_iter([
			("PatientName", &self.name_pattern),
			("PatientID", &self.patient_id),
			("PatientBirthDate", &self.birth_date),
		])
	}
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct QueryStudiesParams {
	#[serde(default)]
	pub patient_id: String,
	/// Study date as YYYYMMDD or a range YYYYMMDD-YYYYMMDD.
	#[serde(default)]
	pub study_date: String,
	/// Modality contained in the study (e.g. "CT").
	#[serde(default)]
	pub modality_in_study: String,
	#[serde(default)]
	pub study_description: String,
	#[serde(default)]
	pub accession_number: String,
	#[serde(default)]
	pub study_instance_uid: String,
	#[serde(flatten)]
	pub preset: PresetParams,
}

impl QueryStudiesParams {
	pub fn criteria(&self) -> QueryCriteria {
		QueryCriteria::from_iter([
			("PatientID", &self.patient_id),
			("StudyDate", &self.study_date),
			("ModalitiesInStudy", &self.modality_in_study),
			("StudyDescription", &self.study_description),
			("AccessionNumber", &self.accession_number),
			("StudyInstanceUID", &self.study_instance_uid),
		])
	}
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct QuerySeriesParams {
	/// The study to search in.
	pub study_instance_uid: String,
	#[serde(default)]
	pub modality: String,
	#[serde(default)]
	pub series_number: String,
	#[serde(default)]
	pub series_description: String,
	#[serde(default)]
	pub series_instance_uid: String,
	#[serde(flatten)]
	pub preset: PresetParams,
}

impl QuerySeriesParams {
	pub fn criteria(&self) -> QueryCriteria {
		QueryCriteria::from_iter([
			("StudyInstanceUID", &self.study_instance_uid),
			("Modality", &self.modality),
			("SeriesNumber", &self.series_number),
			("SeriesDescription", &self.series_description),
			("SeriesInstanceUID", &self.series_instance_uid),
		])
	}
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct QueryInstancesParams {
	/// The series to search in.
	pub series_instance_uid: String,
	#[serde(default)]
	pub instance_number: String,
	#[serde(default)]
	pub sop_instance_uid: String,
	#[serde(flatten)]
	pub preset: PresetParams,
}

impl QueryInstancesParams {
	pub fn criteria(&self) -> QueryCriteria {
		QueryCriteria::from_iter([
			("SeriesInstanceUID", &self.series_instance_uid),
			("InstanceNumber", &self.instance_number),
			("SOPInstanceUID", &self.sop_instance_uid),
		])
	}
}

/// Narrows the preset listing to one level.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct AttributePresetsParams {
	/// Query level: "patient", "study", "series" or "instance".
	#[serde(default)]
	pub level: String,
	/// Preset to list for the level (default "standard").
	#[serde(default)]
	pub attribute_preset: String,
}

impl AttributePresetsParams {
	/// The requested level and preset, or `None` to list everything.
	pub fn level_and_preset(&self) -> Option<(&str, &str)> {
		let level = self.level.trim();
		if level.is_empty() {
			return None;
		}
		let preset = match self.attribute_preset.trim() {
			"" => Tier::default().as_str(),
			preset => preset,
		};
		Some((level, preset))
	}
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SwitchNodeParams {
	/// Name of a configured DICOM node.
	pub node_name: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MoveSeriesParams {
	/// Name of a configured node, or the AE title of the move destination.
	pub destination_node: String,
	pub series_instance_uid: String,
	/// Study of the series. Some archives require it for series level moves.
	#[serde(default)]
	pub study_instance_uid: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MoveStudyParams {
	/// Name of a configured node, or the AE title of the move destination.
	pub destination_node: String,
	pub study_instance_uid: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ExtractPdfParams {
	pub study_instance_uid: String,
	pub series_instance_uid: String,
	/// The Encapsulated PDF instance.
	pub sop_instance_uid: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct FhirSearchParams {
	/// FHIR resource type (e.g. "Patient", "ImagingStudy").
	pub resource_type: String,
	/// Search parameters (e.g. {"family": "Doe"}).
	#[serde(default)]
	pub params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct FhirReadParams {
	pub resource_type: String,
	pub resource_id: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct FhirResourceParams {
	/// The FHIR resource as JSON. It must include "resourceType".
	pub resource: Value,
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct RisListPatientsParams {
	/// Exact medical record number.
	#[serde(default)]
	pub mrn: String,
	/// Substring of the given or family name.
	#[serde(default)]
	pub name_query: String,
	/// Page size between 1 and 100 (default 25).
	#[serde(default)]
	pub limit: Option<i64>,
	#[serde(default)]
	pub offset: Option<i64>,
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;
	use serde_json::json;

	#[test]
	fn blank_filters_are_not_criteria() {
		let params: QueryStudiesParams = serde_json::from_value(json!({
			"patient_id": "P1",
			"study_date": "20230101-20231231",
			"modality_in_study": "",
		}))
		.unwrap();

		let criteria = params.criteria();

		assert_eq!(
			criteria.iter().collect::<Vec<_>>(),
			vec![("PatientID", "P1"), ("StudyDate", "20230101-20231231")]
		);
	}

	#[test]
	fn preset_defaults_to_standard() {
		let params: QueryPatientsParams = serde_json::from_value(json!({})).unwrap();

		let selection = params.preset.selection().unwrap();

		assert_eq!(selection, PresetSelection::new(Tier::Standard));
	}

	#[test]
	fn preset_adjustments_skip_blank_names() {
		let params: QueryPatientsParams = serde_json::from_value(json!({
			"attribute_preset": "Minimal",
			"additional_attributes": ["PatientAddress", " "],
			"exclude_attributes": ["PatientSex"],
		}))
		.unwrap();

		let selection = params.preset.selection().unwrap();

		assert_eq!(
			selection,
			PresetSelection::new(Tier::Minimal)
				.include(["PatientAddress"])
				.exclude(["PatientSex"])
		);
	}

	#[test]
	fn preset_listing_defaults_to_the_standard_tier() {
		let everything: AttributePresetsParams = serde_json::from_value(json!({})).unwrap();
		let level_only: AttributePresetsParams =
			serde_json::from_value(json!({ "level": " series " })).unwrap();

		assert_eq!(everything.level_and_preset(), None);
		assert_eq!(level_only.level_and_preset(), Some(("series", "standard")));
	}

	#[test]
	fn unknown_preset_is_a_configuration_error() {
		let params = PresetParams {
			attribute_preset: String::from("verbose"),
			..PresetParams::default()
		};

		assert!(matches!(params.selection(), Err(QueryError::Configuration(_))));
	}
}
