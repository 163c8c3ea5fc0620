use dicom::core::PrimitiveValue;
use dicom::dictionary_std::uids;
use std::fmt::{Display, Formatter};

/// UI (Unique Identifier) value representation.
pub type UI = String;

/// US (Unsigned Short) value representation.
pub type US = u16;

/// AE (Application Entity) value representation.
pub type AE = String;

/// MEDIUM Priority (0000,0700), used for every DIMSE request.
pub const PRIORITY_MEDIUM: US = 0x0000;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum QueryInformationModel {
	#[default]
	Study,
	Patient,
}

impl QueryInformationModel {
	pub const fn as_find_sop_class(&self) -> &'static str {
		match self {
			Self::Study => uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND,
			Self::Patient => uids::PATIENT_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND,
		}
	}

	pub const fn as_move_sop_class(&self) -> &'static str {
		match self {
			Self::Study => uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_MOVE,
			Self::Patient => uids::PATIENT_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_MOVE,
		}
	}
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum QueryRetrieveLevel {
	Patient,
	Study,
	Series,
	Image,
}

impl Display for QueryRetrieveLevel {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Patient => write!(f, "PATIENT"),
			Self::Study => write!(f, "STUDY"),
			Self::Series => write!(f, "SERIES"),
			Self::Image => write!(f, "IMAGE"),
		}
	}
}

impl From<QueryRetrieveLevel> for PrimitiveValue {
	fn from(level: QueryRetrieveLevel) -> Self {
		Self::Str(level.to_string())
	}
}
