//! Static attribute catalog for the four C-FIND query levels.
//!
//! Every attribute records the lowest preset tier that includes it. Tiers are
//! ordered, so an attribute of a lower tier is part of every higher tier as well.

use crate::query::QueryError;
use crate::types::{QueryInformationModel, QueryRetrieveLevel};
use dicom::core::{Tag, VR};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Entity level of a query.
#[derive(
	Debug, Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum QueryLevel {
	Patient,
	#[default]
	Study,
	Series,
	Instance,
}

impl QueryLevel {
	pub const ALL: [Self; 4] = [Self::Patient, Self::Study, Self::Series, Self::Instance];

	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Patient => "patient",
			Self::Study => "study",
			Self::Series => "series",
			Self::Instance => "instance",
		}
	}

	pub const fn query_retrieve_level(self) -> QueryRetrieveLevel {
		match self {
			Self::Patient => QueryRetrieveLevel::Patient,
			Self::Study => QueryRetrieveLevel::Study,
			Self::Series => QueryRetrieveLevel::Series,
			Self::Instance => QueryRetrieveLevel::Image,
		}
	}

	/// Patients are searched with the patient root model, everything below with the study root.
	pub const fn information_model(self) -> QueryInformationModel {
		match self {
			Self::Patient => QueryInformationModel::Patient,
			Self::Study | Self::Series | Self::Instance => QueryInformationModel::Study,
		}
	}
}

impl Display for QueryLevel {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for QueryLevel {
	type Err = QueryError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"patient" => Ok(Self::Patient),
			"study" => Ok(Self::Study),
			"series" => Ok(Self::Series),
			"instance" | "image" => Ok(Self::Instance),
			_ => Err(QueryError::Configuration(format!(
				"unknown query level '{s}'"
			))),
		}
	}
}

/// Attribute preset tier. Tiers are ordered from least to most verbose.
#[derive(
	Debug, Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
	Minimal,
	#[default]
	Standard,
	Extended,
}

impl Tier {
	pub const ALL: [Self; 3] = [Self::Minimal, Self::Standard, Self::Extended];

	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Minimal => "minimal",
			Self::Standard => "standard",
			Self::Extended => "extended",
		}
	}
}

impl Display for Tier {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Tier {
	type Err = QueryError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"minimal" => Ok(Self::Minimal),
			"standard" => Ok(Self::Standard),
			"extended" => Ok(Self::Extended),
			_ => Err(QueryError::Configuration(format!(
				"unknown attribute preset '{s}' (expected minimal, standard or extended)"
			))),
		}
	}
}

/// A logical field of a query level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDefinition {
	pub keyword: &'static str,
	pub tag: Tag,
	pub vr: VR,
	/// Lowest tier that includes this attribute.
	pub tier: Tier,
}

impl AttributeDefinition {
	const fn new(keyword: &'static str, tag: Tag, vr: VR, tier: Tier) -> Self {
		Self {
			keyword,
			tag,
			vr,
			tier,
		}
	}

	pub fn is_in(&self, tier: Tier) -> bool {
		self.tier <= tier
	}
}

use Tier::{Extended, Minimal, Standard};

#[rustfmt::skip]
const PATIENT_ATTRIBUTES: &[AttributeDefinition] = &[
	AttributeDefinition::new("PatientID", Tag(0x0010, 0x0020), VR::LO, Minimal),
	AttributeDefinition::new("PatientName", Tag(0x0010, 0x0010), VR::PN, Minimal),
	AttributeDefinition::new("PatientBirthDate", Tag(0x0010, 0x0030), VR::DA, Minimal),
	AttributeDefinition::new("PatientSex", Tag(0x0010, 0x0040), VR::CS, Minimal),
	AttributeDefinition::new("PatientAge", Tag(0x0010, 0x1010), VR::AS, Standard),
	AttributeDefinition::new("PatientWeight", Tag(0x0010, 0x1030), VR::DS, Extended),
	AttributeDefinition::new("PatientAddress", Tag(0x0010, 0x1040), VR::LO, Extended),
	AttributeDefinition::new("PatientComments", Tag(0x0010, 0x4000), VR::LT, Extended),
	AttributeDefinition::new("IssuerOfPatientID", Tag(0x0010, 0x0021), VR::LO, Extended),
	AttributeDefinition::new("EthnicGroup", Tag(0x0010, 0x2160), VR::SH, Extended),
];

#[rustfmt::skip]
const STUDY_ATTRIBUTES: &[AttributeDefinition] = &[
	AttributeDefinition::new("StudyInstanceUID", Tag(0x0020, 0x000D), VR::UI, Minimal),
	AttributeDefinition::new("PatientID", Tag(0x0010, 0x0020), VR::LO, Minimal),
	AttributeDefinition::new("StudyDate", Tag(0x0008, 0x0020), VR::DA, Minimal),
	AttributeDefinition::new("StudyDescription", Tag(0x0008, 0x1030), VR::LO, Minimal),
	AttributeDefinition::new("StudyTime", Tag(0x0008, 0x0030), VR::TM, Standard),
	AttributeDefinition::new("AccessionNumber", Tag(0x0008, 0x0050), VR::SH, Standard),
	AttributeDefinition::new("ReferringPhysicianName", Tag(0x0008, 0x0090), VR::PN, Standard),
	AttributeDefinition::new("StudyID", Tag(0x0020, 0x0010), VR::SH, Standard),
	AttributeDefinition::new("NumberOfStudyRelatedSeries", Tag(0x0020, 0x1206), VR::IS, Standard),
	AttributeDefinition::new("NumberOfStudyRelatedInstances", Tag(0x0020, 0x1208), VR::IS, Standard),
	AttributeDefinition::new("ProcedureCodeSequence", Tag(0x0008, 0x1032), VR::SQ, Extended),
	AttributeDefinition::new("StudyComments", Tag(0x0032, 0x4000), VR::LT, Extended),
	AttributeDefinition::new("AdmissionID", Tag(0x0038, 0x0010), VR::LO, Extended),
	AttributeDefinition::new("ModalitiesInStudy", Tag(0x0008, 0x0061), VR::CS, Extended),
	AttributeDefinition::new("RequestingPhysician", Tag(0x0032, 0x1032), VR::PN, Extended),
	AttributeDefinition::new("RequestedProcedureDescription", Tag(0x0032, 0x1060), VR::LO, Extended),
];

#[rustfmt::skip]
const SERIES_ATTRIBUTES: &[AttributeDefinition] = &[
	AttributeDefinition::new("SeriesInstanceUID", Tag(0x0020, 0x000E), VR::UI, Minimal),
	AttributeDefinition::new("StudyInstanceUID", Tag(0x0020, 0x000D), VR::UI, Minimal),
	AttributeDefinition::new("Modality", Tag(0x0008, 0x0060), VR::CS, Minimal),
	AttributeDefinition::new("SeriesNumber", Tag(0x0020, 0x0011), VR::IS, Minimal),
	AttributeDefinition::new("SeriesDescription", Tag(0x0008, 0x103E), VR::LO, Standard),
	AttributeDefinition::new("BodyPartExamined", Tag(0x0018, 0x0015), VR::CS, Standard),
	AttributeDefinition::new("PatientPosition", Tag(0x0018, 0x5100), VR::CS, Standard),
	AttributeDefinition::new("NumberOfSeriesRelatedInstances", Tag(0x0020, 0x1209), VR::IS, Standard),
	AttributeDefinition::new("SeriesDate", Tag(0x0008, 0x0021), VR::DA, Extended),
	AttributeDefinition::new("SeriesTime", Tag(0x0008, 0x0031), VR::TM, Extended),
	AttributeDefinition::new("PerformingPhysicianName", Tag(0x0008, 0x1050), VR::PN, Extended),
	AttributeDefinition::new("ProtocolName", Tag(0x0018, 0x1030), VR::LO, Extended),
	AttributeDefinition::new("OperatorsName", Tag(0x0008, 0x1070), VR::PN, Extended),
	AttributeDefinition::new("PerformedProcedureStepDescription", Tag(0x0040, 0x0254), VR::LO, Extended),
	AttributeDefinition::new("AnatomicalOrientationType", Tag(0x0010, 0x2210), VR::CS, Extended),
	AttributeDefinition::new("InstitutionName", Tag(0x0008, 0x0080), VR::LO, Extended),
];

#[rustfmt::skip]
const INSTANCE_ATTRIBUTES: &[AttributeDefinition] = &[
	AttributeDefinition::new("SOPInstanceUID", Tag(0x0008, 0x0018), VR::UI, Minimal),
	AttributeDefinition::new("SeriesInstanceUID", Tag(0x0020, 0x000E), VR::UI, Minimal),
	AttributeDefinition::new("InstanceNumber", Tag(0x0020, 0x0013), VR::IS, Minimal),
	AttributeDefinition::new("SOPClassUID", Tag(0x0008, 0x0016), VR::UI, Standard),
	AttributeDefinition::new("ContentDate", Tag(0x0008, 0x0023), VR::DA, Standard),
	AttributeDefinition::new("ContentTime", Tag(0x0008, 0x0033), VR::TM, Standard),
	AttributeDefinition::new("ImageType", Tag(0x0008, 0x0008), VR::CS, Standard),
	AttributeDefinition::new("NumberOfFrames", Tag(0x0028, 0x0008), VR::IS, Standard),
	AttributeDefinition::new("AcquisitionDate", Tag(0x0008, 0x0022), VR::DA, Extended),
	AttributeDefinition::new("AcquisitionTime", Tag(0x0008, 0x0032), VR::TM, Extended),
	AttributeDefinition::new("ImageComments", Tag(0x0020, 0x4000), VR::LT, Extended),
	AttributeDefinition::new("BurnedInAnnotation", Tag(0x0028, 0x0301), VR::CS, Extended),
	AttributeDefinition::new("WindowCenter", Tag(0x0028, 0x1050), VR::DS, Extended),
	AttributeDefinition::new("WindowWidth", Tag(0x0028, 0x1051), VR::DS, Extended),
	AttributeDefinition::new("ImagePositionPatient", Tag(0x0020, 0x0032), VR::DS, Extended),
	AttributeDefinition::new("ImageOrientationPatient", Tag(0x0020, 0x0037), VR::DS, Extended),
	AttributeDefinition::new("SliceLocation", Tag(0x0020, 0x1041), VR::DS, Extended),
	AttributeDefinition::new("PixelSpacing", Tag(0x0028, 0x0030), VR::DS, Extended),
	AttributeDefinition::new("PhotometricInterpretation", Tag(0x0028, 0x0004), VR::CS, Extended),
	AttributeDefinition::new("BitsAllocated", Tag(0x0028, 0x0100), VR::US, Extended),
	AttributeDefinition::new("BitsStored", Tag(0x0028, 0x0101), VR::US, Extended),
];

/// The attribute catalog for all query levels.
///
/// Built once at startup and shared read-only through the server state.
#[derive(Debug, Clone)]
pub struct AttributeCatalog {
	levels: BTreeMap<QueryLevel, &'static [AttributeDefinition]>,
}

impl Default for AttributeCatalog {
	fn default() -> Self {
		Self::standard()
	}
}

impl AttributeCatalog {
	/// The built-in catalog.
	pub fn standard() -> Self {
		let levels = BTreeMap::from([
			(QueryLevel::Patient, PATIENT_ATTRIBUTES),
			(QueryLevel::Study, STUDY_ATTRIBUTES),
			(QueryLevel::Series, SERIES_ATTRIBUTES),
			(QueryLevel::Instance, INSTANCE_ATTRIBUTES),
		]);
		Self { levels }
	}

	/// All attributes known for a query level, in catalog order.
	pub fn attributes(&self, level: QueryLevel) -> &[AttributeDefinition] {
		self.levels.get(&level).copied().unwrap_or_default()
	}

	/// Looks up an attribute of a query level by its keyword.
	pub fn get(&self, level: QueryLevel, keyword: &str) -> Option<&AttributeDefinition> {
		self.attributes(level)
			.iter()
			.find(|attribute| attribute.keyword == keyword)
	}

	/// The attributes included in a tier of a query level, in catalog order.
	pub fn fields_for(&self, level: QueryLevel, tier: Tier) -> Vec<&AttributeDefinition> {
		self.attributes(level)
			.iter()
			.filter(|attribute| attribute.is_in(tier))
			.collect()
	}

	/// String-keyed variant of [`Self::fields_for`]. Level and tier names are case-insensitive.
	pub fn fields_for_names(&self, level: &str, tier: &str) -> Result<Vec<&'static str>, QueryError> {
		let level = QueryLevel::from_str(level)?;
		let tier = Tier::from_str(tier)?;
		Ok(self
			.fields_for(level, tier)
			.into_iter()
			.map(|attribute| attribute.keyword)
			.collect())
	}

	/// Keyword lists grouped by tier and level.
	pub fn presets(&self) -> BTreeMap<Tier, BTreeMap<QueryLevel, Vec<&'static str>>> {
		Tier::ALL
			.into_iter()
			.map(|tier| {
				let levels = QueryLevel::ALL
					.into_iter()
					.map(|level| {
						let keywords = self
							.fields_for(level, tier)
							.into_iter()
							.map(|attribute| attribute.keyword)
							.collect();
						(level, keywords)
					})
					.collect();
				(tier, levels)
			})
			.collect()
	}
}
