//! MCP tool surface of the server.
//!
//! Every tool call is dispatched by [`DicomMcpServer`], which shares a single [`McpState`] across
//! all sessions. The attribute catalog in that state is immutable; the node registry is the only
//! mutable piece of shared state.
pub mod params;
mod server;

pub use server::DicomMcpServer;

use crate::backend::dimse::retrieve::InstanceRetriever;
use crate::backend::fhir::{FhirClient, FhirError};
use crate::backend::ris::{MiniRisClient, RisError};
use crate::config::AppConfig;
use crate::nodes::{NodeError, NodeRegistry};
use crate::query::catalog::AttributeCatalog;
use crate::query::QueryError;
use crate::types::AE;
use rmcp::ErrorData;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// State shared by all MCP sessions.
#[derive(Debug)]
pub struct McpState {
	pub catalog: Arc<AttributeCatalog>,
	pub nodes: NodeRegistry,
	pub calling_aet: AE,
	pub timeout: Duration,
	pub retriever: Option<InstanceRetriever>,
	pub fhir: Option<FhirClient>,
	pub ris: Option<MiniRisClient>,
}

#[derive(Debug, Error)]
pub enum StateError {
	#[error(transparent)]
	Node(#[from] NodeError),
	#[error(transparent)]
	Fhir(#[from] FhirError),
	#[error(transparent)]
	Ris(#[from] RisError),
}

impl McpState {
	pub fn new(config: &AppConfig) -> Result<Self, StateError> {
		let fhir = config.fhir.as_ref().map(FhirClient::new).transpose()?;
		if let Some(fhir) = &config.fhir {
			info!(base_url = %fhir.base_url, "Enabled FHIR tools");
		}
		let retriever = config
			.dicom
			.receiver
			.clone()
			.map(|receiver| InstanceRetriever::new(receiver, config.dicom.timeout()));
		if let Some(receiver) = &config.dicom.receiver {
			info!(aet = %receiver.aet, port = receiver.port, "Enabled PDF text extraction");
		}
		let ris = config.ris.as_ref().map(MiniRisClient::new).transpose()?;

		Ok(Self {
			catalog: Arc::new(AttributeCatalog::standard()),
			nodes: NodeRegistry::new(&config.dicom)?,
			calling_aet: config.dicom.calling_aet.clone(),
			timeout: config.dicom.timeout(),
			retriever,
			fhir,
			ris,
		})
	}
}

impl From<QueryError> for ErrorData {
	fn from(err: QueryError) -> Self {
		match err {
			QueryError::Transport { .. } => Self::internal_error(err.to_string(), None),
			QueryError::Configuration(_)
			| QueryError::MissingRequiredKey { .. }
			| QueryError::UnknownField { .. } => Self::invalid_params(err.to_string(), None),
		}
	}
}

impl From<NodeError> for ErrorData {
	fn from(err: NodeError) -> Self {
		Self::invalid_params(err.to_string(), None)
	}
}

impl From<FhirError> for ErrorData {
	fn from(err: FhirError) -> Self {
		match err {
			FhirError::MissingField(_) => Self::invalid_params(err.to_string(), None),
			_ => Self::internal_error(err.to_string(), None),
		}
	}
}

impl From<RisError> for ErrorData {
	fn from(err: RisError) -> Self {
		Self::internal_error(err.to_string(), None)
	}
}
