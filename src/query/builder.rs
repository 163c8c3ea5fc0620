use crate::query::catalog::{AttributeCatalog, QueryLevel};
use crate::query::preset::ResolvedFields;
use crate::query::QueryError;
use dicom::core::ops::{ApplyOp, AttributeAction, AttributeOp, AttributeSelector};
use dicom::core::{PrimitiveValue, Tag, VR};
use dicom::dictionary_std::tags;
use dicom::object::InMemDicomObject;
use std::fmt::{Display, Formatter};
use tracing::warn;

/// A matching value as understood by C-FIND.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchValue {
	/// Single value matching.
	Literal(String),
	/// Wild card matching with `*` and `?`.
	Wildcard(String),
	/// Range matching for dates and times. Either bound may be open.
	Range {
		start: Option<String>,
		end: Option<String>,
	},
}

impl MatchValue {
	/// Classifies a caller-supplied value for an attribute of the given VR.
	///
	/// Only DA, TM and DT attributes support range matching; a hyphen in any other
	/// value is matched literally.
	pub fn parse(vr: VR, value: &str) -> Self {
		let value = value.trim();
		if matches!(vr, VR::DA | VR::TM | VR::DT) {
			if let Some((start, end)) = value.split_once('-') {
				let bound = |s: &str| (!s.trim().is_empty()).then(|| s.trim().to_owned());
				return Self::Range {
					start: bound(start),
					end: bound(end),
				};
			}
		}
		if value.contains(['*', '?']) {
			Self::Wildcard(value.to_owned())
		} else {
			Self::Literal(value.to_owned())
		}
	}
}

impl Display for MatchValue {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Literal(value) | Self::Wildcard(value) => f.write_str(value),
			Self::Range { start, end } => write!(
				f,
				"{}-{}",
				start.as_deref().unwrap_or_default(),
				end.as_deref().unwrap_or_default()
			),
		}
	}
}

/// Matching criteria keyed by catalog keyword.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryCriteria(Vec<(String, String)>);

impl QueryCriteria {
	pub const fn new() -> Self {
		Self(Vec::new())
	}

	/// Adds a criterion. Blank values mean "not supplied" and are ignored.
	pub fn with(mut self, field: impl Into<String>, value: impl AsRef<str>) -> Self {
		self.insert(field, value);
		self
	}

	pub fn insert(&mut self, field: impl Into<String>, value: impl AsRef<str>) {
		let value = value.as_ref().trim();
		if value.is_empty() {
			return;
		}
		let field = field.into();
		self.0.retain(|(existing, _)| *existing != field);
		self.0.push((field, value.to_owned()));
	}

	pub fn get(&self, field: &str) -> Option<&str> {
		self.0
			.iter()
			.find(|(name, _)| name == field)
			.map(|(_, value)| value.as_str())
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
		self.0
			.iter()
			.map(|(field, value)| (field.as_str(), value.as_str()))
	}
}

impl<K: Into<String>, V: AsRef<str>> FromIterator<(K, V)> for QueryCriteria {
	fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
		let mut criteria = Self::new();
		for (field, value) in iter {
			criteria.insert(field, value);
		}
		criteria
	}
}

/// Parent identifiers that must be present to query a level.
pub const fn required_keys(level: QueryLevel) -> &'static [&'static str] {
	match level {
		QueryLevel::Patient | QueryLevel::Study => &[],
		QueryLevel::Series => &["StudyInstanceUID"],
		QueryLevel::Instance => &["SeriesInstanceUID"],
	}
}

/// Translates criteria and the resolved field set into a C-FIND identifier.
///
/// Every resolved field is a return key with an empty value unless a criterion supplies
/// a match value. Criteria must name attributes of the level's catalog.
pub fn build_query(
	catalog: &AttributeCatalog,
	level: QueryLevel,
	criteria: &QueryCriteria,
	fields: &ResolvedFields,
) -> Result<InMemDicomObject, QueryError> {
	for key in required_keys(level) {
		if criteria.get(key).is_none() {
			return Err(QueryError::MissingRequiredKey {
				level,
				field: (*key).to_owned(),
			});
		}
	}

	let mut matches = Vec::new();
	for (field, value) in criteria.iter() {
		let attribute = catalog
			.get(level, field)
			.ok_or_else(|| QueryError::UnknownField {
				level,
				field: field.to_owned(),
			})?;
		matches.push((attribute.tag, MatchValue::parse(attribute.vr, value)));
	}

	let mut attributes: Vec<(Tag, PrimitiveValue)> = Vec::with_capacity(fields.len() + matches.len() + 1);
	attributes.push((
		tags::QUERY_RETRIEVE_LEVEL,
		PrimitiveValue::from(level.query_retrieve_level()),
	));
	for field in fields.iter() {
		if !matches.iter().any(|(tag, _)| *tag == field.tag()) {
			attributes.push((field.tag(), PrimitiveValue::Empty));
		}
	}
	for (tag, value) in matches {
		attributes.push((tag, PrimitiveValue::from(value.to_string())));
	}

	let mut identifier = InMemDicomObject::new_empty();
	for (tag, value) in attributes {
		if let Err(err) = identifier.apply(AttributeOp::new(
			AttributeSelector::from(tag),
			AttributeAction::Set(value),
		)) {
			warn!("Skipped attribute operation: {err}");
		}
	}
	Ok(identifier)
}
