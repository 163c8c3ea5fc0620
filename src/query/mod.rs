//! Attribute-preset driven C-FIND pipeline shared by all query tools.
//!
//! A request is resolved against the [`AttributeCatalog`](catalog::AttributeCatalog), turned into
//! a C-FIND identifier, sent through a [`FindTransport`] and every returned identifier is
//! projected back onto the resolved field set.
pub mod builder;
pub mod catalog;
pub mod normalize;
pub mod preset;

use crate::types::QueryInformationModel;
use async_trait::async_trait;
use builder::{build_query, QueryCriteria};
use catalog::{AttributeCatalog, QueryLevel};
use dicom::object::InMemDicomObject;
use normalize::{normalize, ResultRecord};
use preset::{resolve, PresetSelection};
use thiserror::Error;
use tracing::{debug, instrument};

/// Error type of the underlying network call. It is passed through uninterpreted.
pub type TransportError = Box<dyn std::error::Error + Send + Sync>;

/// Sends a single C-FIND request and collects all pending identifiers.
#[async_trait]
pub trait FindTransport: Send + Sync {
	async fn send_find(
		&self,
		model: QueryInformationModel,
		identifier: InMemDicomObject,
	) -> Result<Vec<InMemDicomObject>, TransportError>;
}

#[derive(Debug, Error)]
pub enum QueryError {
	#[error("Configuration error: {0}")]
	Configuration(String),
	#[error("{field} is required to query the {level} level")]
	MissingRequiredKey { level: QueryLevel, field: String },
	#[error("{field} is not a known attribute of the {level} level")]
	UnknownField { level: QueryLevel, field: String },
	#[error(transparent)]
	Transport { source: TransportError },
}

/// A single query of one level.
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
	pub level: QueryLevel,
	pub criteria: QueryCriteria,
	pub selection: PresetSelection,
}

/// Runs the full pipeline for a request.
///
/// Validation errors are raised before the transport is called.
#[instrument(skip_all, fields(level = %request.level, tier = %request.selection.tier))]
pub async fn query<T>(
	catalog: &AttributeCatalog,
	transport: &T,
	request: &QueryRequest,
) -> Result<Vec<ResultRecord>, QueryError>
where
	T: FindTransport + ?Sized,
{
	let fields = resolve(catalog, request.level, &request.selection)?;
	let identifier = build_query(catalog, request.level, &request.criteria, &fields)?;
	debug!(fields = fields.len(), "Sending C-FIND request");

	let responses = transport
		.send_find(request.level.information_model(), identifier)
		.await
		.map_err(|source| QueryError::Transport { source })?;
	debug!(results = responses.len(), "Received C-FIND responses");

	Ok(responses
		.iter()
		.map(|response| normalize(response, &fields))
		.collect())
}
