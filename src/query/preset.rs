use crate::query::catalog::{AttributeCatalog, AttributeDefinition, QueryLevel, Tier};
use crate::query::QueryError;
use dicom::core::{DataDictionary, Tag};
use dicom::object::StandardDataDictionary;
use std::collections::BTreeSet;

/// Tier plus caller adjustments for a single request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresetSelection {
	pub tier: Tier,
	pub additional_fields: Vec<String>,
	pub excluded_fields: Vec<String>,
}

impl PresetSelection {
	pub const fn new(tier: Tier) -> Self {
		Self {
			tier,
			additional_fields: Vec::new(),
			excluded_fields: Vec::new(),
		}
	}

	pub fn include<I, S>(mut self, fields: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.additional_fields.extend(fields.into_iter().map(Into::into));
		self
	}

	pub fn exclude<I, S>(mut self, fields: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.excluded_fields.extend(fields.into_iter().map(Into::into));
		self
	}
}

/// A field that will be requested from and returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedField<'c> {
	/// An attribute of the level's catalog.
	Known(&'c AttributeDefinition),
	/// An ad-hoc attribute outside the catalog, requested by tag.
	Raw { name: String, tag: Tag },
}

impl ResolvedField<'_> {
	pub fn name(&self) -> &str {
		match self {
			Self::Known(attribute) => attribute.keyword,
			Self::Raw { name, .. } => name,
		}
	}

	pub const fn tag(&self) -> Tag {
		match self {
			Self::Known(attribute) => attribute.tag,
			Self::Raw { tag, .. } => *tag,
		}
	}
}

/// The final, ordered and duplicate-free field set of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedFields<'c>(Vec<ResolvedField<'c>>);

impl<'c> ResolvedFields<'c> {
	pub fn iter(&self) -> impl Iterator<Item = &ResolvedField<'c>> {
		self.0.iter()
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn contains(&self, name: &str) -> bool {
		self.0.iter().any(|field| field.name() == name)
	}

	pub fn names(&self) -> Vec<&str> {
		self.0.iter().map(ResolvedField::name).collect()
	}

	fn push(&mut self, field: ResolvedField<'c>) {
		let duplicate = self
			.0
			.iter()
			.any(|existing| existing.name() == field.name() || existing.tag() == field.tag());
		if !duplicate {
			self.0.push(field);
		}
	}
}

/// Computes `(fields_for(level, tier) ∪ additional) − excluded`.
///
/// Exclusion is applied last, so a field that is both added and excluded is dropped. Excluded
/// names are matched by keyword and by tag, so `00100040` removes `PatientSex`.
pub fn resolve<'c>(
	catalog: &'c AttributeCatalog,
	level: QueryLevel,
	selection: &PresetSelection,
) -> Result<ResolvedFields<'c>, QueryError> {
	let excluded_names: BTreeSet<&str> = selection
		.excluded_fields
		.iter()
		.map(|name| name.trim())
		.filter(|name| !name.is_empty())
		.collect();
	let excluded_tags: BTreeSet<Tag> = excluded_names
		.iter()
		.filter_map(|name| {
			catalog
				.get(level, name)
				.map(|attribute| attribute.tag)
				.or_else(|| parse_raw_tag(name))
		})
		.collect();

	let mut fields = ResolvedFields::default();
	for attribute in catalog.fields_for(level, selection.tier) {
		fields.push(ResolvedField::Known(attribute));
	}

	for name in &selection.additional_fields {
		let name = name.trim();
		if name.is_empty() {
			continue;
		}
		let field = match catalog.get(level, name) {
			Some(attribute) => ResolvedField::Known(attribute),
			None => ResolvedField::Raw {
				name: name.to_owned(),
				tag: parse_raw_tag(name).ok_or_else(|| QueryError::UnknownField {
					level,
					field: name.to_owned(),
				})?,
			},
		};
		fields.push(field);
	}

	fields
		.0
		.retain(|field| !excluded_names.contains(field.name()) && !excluded_tags.contains(&field.tag()));
	Ok(fields)
}

/// Resolves an ad-hoc attribute by standard dictionary keyword or hexadecimal tag.
///
/// Accepted tag forms are `GGGGEEEE`, `GGGG,EEEE` and `(GGGG,EEEE)`.
pub fn parse_raw_tag(name: &str) -> Option<Tag> {
	if let Some(entry) = StandardDataDictionary.by_name(name) {
		return Some(entry.tag.inner());
	}

	let hex: String = name
		.trim_start_matches('(')
		.trim_end_matches(')')
		.chars()
		.filter(|c| *c != ',')
		.collect();
	if hex.len() != 8 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
		return None;
	}
	let group = u16::from_str_radix(&hex[..4], 16).ok()?;
	let element = u16::from_str_radix(&hex[4..], 16).ok()?;
	Some(Tag(group, element))
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	fn names(fields: &ResolvedFields) -> BTreeSet<String> {
		fields.iter().map(|field| field.name().to_owned()).collect()
	}

	fn set(items: &[&str]) -> BTreeSet<String> {
		items.iter().map(|item| (*item).to_owned()).collect()
	}

	#[test]
	fn adds_and_excludes_against_the_tier() {
		let catalog = AttributeCatalog::standard();
		let selection = PresetSelection::new(Tier::Minimal)
			.include(["PatientAddress"])
			.exclude(["PatientSex"]);

		let fields = resolve(&catalog, QueryLevel::Patient, &selection).unwrap();

		assert_eq!(
			names(&fields),
			set(&["PatientID", "PatientName", "PatientBirthDate", "PatientAddress"])
		);
	}

	#[test]
	fn exclusion_wins_over_addition() {
		let catalog = AttributeCatalog::standard();
		let selection = PresetSelection::new(Tier::Minimal)
			.include(["StudyComments"])
			.exclude(["StudyComments"]);

		let fields = resolve(&catalog, QueryLevel::Study, &selection).unwrap();

		assert!(!fields.contains("StudyComments"));
	}

	#[test]
	fn exclusions_match_raw_tags() {
		let catalog = AttributeCatalog::standard();
		let selection = PresetSelection::new(Tier::Minimal)
			.include(["00081090", "PatientAddress"])
			.exclude(["00100040", "(0008,1090)", "PatientAddress"]);

		let fields = resolve(&catalog, QueryLevel::Patient, &selection).unwrap();

		assert_eq!(fields.names(), vec!["PatientID", "PatientName", "PatientBirthDate"]);
	}

	#[test]
	fn excluding_an_absent_field_is_a_no_op() {
		let catalog = AttributeCatalog::standard();
		let plain = resolve(&catalog, QueryLevel::Series, &PresetSelection::new(Tier::Standard)).unwrap();
		let with_exclusion = resolve(
			&catalog,
			QueryLevel::Series,
			&PresetSelection::new(Tier::Standard).exclude(["PatientWeight"]),
		)
		.unwrap();

		assert_eq!(plain, with_exclusion);
	}

	#[test]
	fn resolving_is_idempotent() {
		let catalog = AttributeCatalog::standard();
		let selection = PresetSelection::new(Tier::Standard)
			.include(["InstitutionName", "00081090"])
			.exclude(["BodyPartExamined"]);
		let first = resolve(&catalog, QueryLevel::Series, &selection).unwrap();

		let again = PresetSelection::new(Tier::Standard)
			.include(first.names())
			.exclude(selection.excluded_fields.clone());
		let second = resolve(&catalog, QueryLevel::Series, &again).unwrap();

		assert_eq!(first, second);
	}

	#[test]
	fn unknown_catalog_fields_become_raw_tags() {
		let catalog = AttributeCatalog::standard();
		let selection = PresetSelection::new(Tier::Minimal).include([
			"PatientAddress",
			"(0009,1001)",
			"00081090",
		]);

		let fields = resolve(&catalog, QueryLevel::Study, &selection).unwrap();
		let raw: Vec<_> = fields
			.iter()
			.filter_map(|field| match field {
				ResolvedField::Raw { name, tag } => Some((name.as_str(), *tag)),
				ResolvedField::Known(_) => None,
			})
			.collect();

		assert_eq!(
			raw,
			vec![
				("PatientAddress", Tag(0x0010, 0x1040)),
				("(0009,1001)", Tag(0x0009, 0x1001)),
				("00081090", Tag(0x0008, 0x1090)),
			]
		);
	}

	#[test]
	fn unresolvable_additional_field_is_rejected() {
		let catalog = AttributeCatalog::standard();
		let selection = PresetSelection::new(Tier::Minimal).include(["NotAnAttribute"]);

		let result = resolve(&catalog, QueryLevel::Patient, &selection);

		assert!(matches!(result, Err(QueryError::UnknownField { .. })));
	}

	#[test]
	fn duplicate_additions_are_collapsed() {
		let catalog = AttributeCatalog::standard();
		let selection = PresetSelection::new(Tier::Minimal).include(["PatientID", "00100020", "PatientAge"]);

		let fields = resolve(&catalog, QueryLevel::Patient, &selection).unwrap();

		assert_eq!(
			fields.names(),
			vec!["PatientID", "PatientName", "PatientBirthDate", "PatientSex", "PatientAge"]
		);
	}
}
