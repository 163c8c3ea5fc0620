use crate::config::{DicomConfig, DicomNodeConfig};
use crate::types::AE;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;
use tracing::info;

/// The configured DICOM nodes and the node that tools currently talk to.
#[derive(Debug)]
pub struct NodeRegistry {
	nodes: BTreeMap<String, DicomNodeConfig>,
	current: RwLock<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSummary {
	pub name: String,
	pub host: String,
	pub port: u16,
	pub ae_title: AE,
	pub description: String,
	pub is_current: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeListing {
	pub current_node: String,
	pub nodes: Vec<NodeSummary>,
}

#[derive(Debug, Error)]
pub enum NodeError {
	#[error("Node '{0}' is not configured")]
	Unknown(String),
	#[error("No DICOM nodes are configured")]
	Empty,
}

impl NodeRegistry {
	pub fn new(config: &DicomConfig) -> Result<Self, NodeError> {
		let current = config.initial_node().ok_or(NodeError::Empty)?.to_owned();
		Ok(Self {
			nodes: config.nodes.clone(),
			current: RwLock::new(current),
		})
	}

	/// The name and configuration of the current node.
	pub fn current(&self) -> Result<(String, DicomNodeConfig), NodeError> {
		let name = self
			.current
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.clone();
		let node = self.get(&name)?.clone();
		Ok((name, node))
	}

	pub fn get(&self, name: &str) -> Result<&DicomNodeConfig, NodeError> {
		self.nodes
			.get(name)
			.ok_or_else(|| NodeError::Unknown(name.to_owned()))
	}

	/// Selects the node used by subsequent operations.
	pub fn switch(&self, name: &str) -> Result<&DicomNodeConfig, NodeError> {
		let node = self.get(name)?;
		*self.current.write().unwrap_or_else(PoisonError::into_inner) = name.to_owned();
		info!(node = name, aet = %node.aet, "Switched current DICOM node");
		Ok(node)
	}

	pub fn list(&self) -> NodeListing {
		let current_node = self
			.current
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.clone();
		let nodes = self
			.nodes
			.iter()
			.map(|(name, node)| NodeSummary {
				name: name.clone(),
				host: node.host.clone(),
				port: node.port,
				ae_title: node.aet.clone(),
				description: node.description.clone(),
				is_current: *name == current_node,
			})
			.collect();
		NodeListing {
			current_node,
			nodes,
		}
	}
}
