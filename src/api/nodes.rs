use crate::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

pub fn routes() -> Router<AppState> {
	Router::new()
		.route("/nodes", get(all_nodes))
		.route("/nodes/{name}", get(node))
}

async fn all_nodes(state: State<AppState>) -> impl IntoResponse {
	Json(state.mcp.nodes.list())
}

async fn node(state: State<AppState>, Path(name): Path<String>) -> impl IntoResponse {
	match state.mcp.nodes.list().nodes.into_iter().find(|node| node.name == name) {
		Some(node) => Json(node).into_response(),
		None => (StatusCode::NOT_FOUND, format!("Unknown node {name}")).into_response(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::{DicomConfig, DicomNodeConfig};
	use crate::mcp::McpState;
	use crate::nodes::NodeRegistry;
	use crate::query::catalog::AttributeCatalog;
	use crate::types::AE;
	use pretty_assertions::assert_eq;
	use serde_json::Value;
	use std::collections::BTreeMap;
	use std::sync::Arc;
	use std::time::Duration;

	async fn serve() -> String {
		let dicom = DicomConfig {
			calling_aet: AE::from("DICOM-MCP"),
			current_node: None,
			timeout: 100,
			nodes: BTreeMap::from([(
				String::from("orthanc"),
				DicomNodeConfig {
					host: String::from("localhost"),
					port: 4242,
					aet: AE::from("ORTHANC"),
					description: String::from("Local Orthanc"),
				},
			)]),
			receiver: None,
		};
		let state = AppState {
			mcp: Arc::new(McpState {
				catalog: Arc::new(AttributeCatalog::standard()),
				nodes: NodeRegistry::new(&dicom).unwrap(),
				calling_aet: dicom.calling_aet.clone(),
				timeout: Duration::from_millis(100),
				retriever: None,
				fhir: None,
				ris: None,
			}),
		};
		let app = routes().with_state(state);

		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let address = listener.local_addr().unwrap();
		tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
		format!("http://{address}")
	}

	#[tokio::test]
	async fn lists_configured_nodes() {
		let base = serve().await;

		let listing: Value = reqwest::get(format!("{base}/nodes"))
			.await
			.unwrap()
			.json()
			.await
			.unwrap();

		assert_eq!(listing["current_node"], "orthanc");
		assert_eq!(listing["nodes"][0]["ae_title"], "ORTHANC");
	}

	#[tokio::test]
	async fn unknown_node_is_not_found() {
		let base = serve().await;

		let response = reqwest::get(format!("{base}/nodes/nowhere")).await.unwrap();

		assert_eq!(response.status().as_u16(), 404);
	}
}
