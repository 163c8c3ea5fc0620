use crate::backend::dimse::cecho::EchoServiceClassUser;
use crate::backend::dimse::cfind::findscu::FindServiceClassUser;
use crate::backend::dimse::cmove::movescu::{MoveOutcome, MoveServiceClassUser};
use crate::backend::dimse::cmove::CompositeMoveRequest;
use crate::backend::dimse::next_message_id;
use crate::backend::dimse::retrieve::InstanceRetriever;
use crate::backend::fhir::FhirClient;
use crate::backend::pdf::{self, PdfText};
use crate::backend::ris::{MiniRisClient, PatientFilter};
use crate::mcp::params::{
	AttributePresetsParams, ExtractPdfParams, FhirReadParams, FhirResourceParams, FhirSearchParams,
	MoveSeriesParams, MoveStudyParams, PresetParams, QueryInstancesParams, QueryPatientsParams,
	QuerySeriesParams, QueryStudiesParams, RisListPatientsParams, SwitchNodeParams,
};
use crate::mcp::McpState;
use crate::query::builder::QueryCriteria;
use crate::query::catalog::QueryLevel;
use crate::query::{query, QueryRequest};
use crate::types::AE;
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{
	CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo,
};
use rmcp::{tool, tool_handler, tool_router, ErrorData, ServerHandler};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Dispatches MCP tool calls onto the DICOM, FHIR and mini-RIS backends.
#[derive(Clone)]
pub struct DicomMcpServer {
	state: Arc<McpState>,
	tool_router: ToolRouter<Self>,
}

fn json_result(value: &impl Serialize) -> Result<CallToolResult, ErrorData> {
	let text = serde_json::to_string_pretty(value)
		.map_err(|err| ErrorData::internal_error(err.to_string(), None))?;
	Ok(CallToolResult::success(vec![Content::text(text)]))
}

fn not_blank<'a>(name: &str, value: &'a str) -> Result<&'a str, ErrorData> {
	match value.trim() {
		"" => Err(ErrorData::invalid_params(format!("{name} must not be empty"), None)),
		value => Ok(value),
	}
}

#[tool_router]
impl DicomMcpServer {
	pub fn new(state: Arc<McpState>) -> Self {
		Self {
			state,
			tool_router: Self::tool_router(),
		}
	}

	fn fhir(&self) -> Result<&FhirClient, ErrorData> {
		self.state.fhir.as_ref().ok_or_else(|| {
			ErrorData::invalid_request("FHIR server is not configured (missing [fhir] section)", None)
		})
	}

	fn ris(&self) -> Result<&MiniRisClient, ErrorData> {
		self.state.ris.as_ref().ok_or_else(|| {
			ErrorData::invalid_request("Mini-RIS database is not configured (missing [ris] section)", None)
		})
	}

	fn retriever(&self) -> Result<&InstanceRetriever, ErrorData> {
		self.state.retriever.as_ref().ok_or_else(|| {
			ErrorData::invalid_request(
				"PDF extraction is not configured (missing [dicom.receiver] section)",
				None,
			)
		})
	}

	/// Runs a query against the current node.
	async fn run_query(
		&self,
		level: QueryLevel,
		criteria: QueryCriteria,
		preset: &PresetParams,
	) -> Result<CallToolResult, ErrorData> {
		let request = QueryRequest {
			level,
			criteria,
			selection: preset.selection()?,
		};
		let (name, node) = self.state.nodes.current()?;
		debug!(node = %name, %level, "Querying current node");

		let transport = FindServiceClassUser::new(self.state.calling_aet.clone(), node, self.state.timeout);
		let records = query(&self.state.catalog, &transport, &request).await?;
		json_result(&records)
	}

	/// Resolves a configured node name to its AE title, otherwise takes the value as AE title.
	fn destination_aet(&self, destination: &str) -> Result<AE, ErrorData> {
		let destination = not_blank("destination_node", destination)?;
		Ok(self.state.nodes.get(destination).map_or_else(
			|_| AE::from(destination),
			|node| node.aet.clone(),
		))
	}

	async fn run_move(&self, request: CompositeMoveRequest) -> Result<CallToolResult, ErrorData> {
		let (_, node) = self.state.nodes.current()?;
		let movescu = MoveServiceClassUser::new(self.state.calling_aet.clone(), node, self.state.timeout);
		let outcome = match movescu.invoke(request).await {
			Ok(outcome) => outcome,
			Err(err) => {
				warn!(error = %err, "C-MOVE could not be performed");
				MoveOutcome::failed(format!("C-MOVE operation failed: {err}"))
			}
		};
		json_result(&outcome)
	}

	#[tool(description = "List all configured DICOM nodes and show which one is currently selected")]
	async fn list_dicom_nodes(&self) -> Result<CallToolResult, ErrorData> {
		let listing = self.state.nodes.list();
		json_result(&json!({
			"success": true,
			"calling_aet": self.state.calling_aet,
			"current_node": listing.current_node,
			"nodes": listing.nodes,
		}))
	}

	#[tool(description = "Switch the active DICOM node to a different configured node")]
	async fn switch_dicom_node(
		&self,
		Parameters(SwitchNodeParams { node_name }): Parameters<SwitchNodeParams>,
	) -> Result<CallToolResult, ErrorData> {
		self.state.nodes.switch(&node_name)?;
		json_result(&json!({
			"success": true,
			"message": format!("Switched to DICOM node: {node_name}"),
			"current_node": node_name,
		}))
	}

	#[tool(description = "Verify connectivity to the current DICOM node using C-ECHO")]
	async fn verify_connection(&self) -> Result<CallToolResult, ErrorData> {
		let (_, node) = self.state.nodes.current()?;
		let calling_aet = &self.state.calling_aet;
		let echoscu = EchoServiceClassUser::new(calling_aet.clone(), node.clone(), self.state.timeout);

		let message = match echoscu.echo().await {
			Ok(outcome) if outcome.success => format!(
				"Connection successful to {}:{} (Called AE: {}, Calling AE: {calling_aet})",
				node.host, node.port, node.aet
			),
			Ok(outcome) => format!("C-ECHO failed with status: 0x{:04X}", outcome.status),
			Err(err) => {
				warn!(error = %err, "C-ECHO could not be performed");
				format!(
					"Failed to associate with DICOM node at {}:{} (Called AE: {}, Calling AE: {calling_aet}): {err}",
					node.host, node.port, node.aet
				)
			}
		};
		Ok(CallToolResult::success(vec![Content::text(message)]))
	}

	#[tool(description = "Query patients on the current DICOM node. Supports wildcards in the name and date ranges.")]
	async fn query_patients(
		&self,
		Parameters(params): Parameters<QueryPatientsParams>,
	) -> Result<CallToolResult, ErrorData> {
		self.run_query(QueryLevel::Patient, params.criteria(), &params.preset)
			.await
	}

	#[tool(description = "Query studies on the current DICOM node. Dates accept ranges like 20230101-20231231.")]
	async fn query_studies(
		&self,
		Parameters(params): Parameters<QueryStudiesParams>,
	) -> Result<CallToolResult, ErrorData> {
		self.run_query(QueryLevel::Study, params.criteria(), &params.preset)
			.await
	}

	#[tool(description = "Query the series of a study on the current DICOM node")]
	async fn query_series(
		&self,
		Parameters(params): Parameters<QuerySeriesParams>,
	) -> Result<CallToolResult, ErrorData> {
		self.run_query(QueryLevel::Series, params.criteria(), &params.preset)
			.await
	}

	#[tool(description = "Query the instances of a series on the current DICOM node")]
	async fn query_instances(
		&self,
		Parameters(params): Parameters<QueryInstancesParams>,
	) -> Result<CallToolResult, ErrorData> {
		self.run_query(QueryLevel::Instance, params.criteria(), &params.preset)
			.await
	}

	#[tool(description = "Get the attribute names of every preset (minimal, standard, extended) per query level. \
		Pass a level, and optionally a preset, to list a single preset.")]
	async fn get_attribute_presets(
		&self,
		Parameters(params): Parameters<AttributePresetsParams>,
	) -> Result<CallToolResult, ErrorData> {
		let Some((level, preset)) = params.level_and_preset() else {
			return json_result(&self.state.catalog.presets());
		};
		let attributes = self.state.catalog.fields_for_names(level, preset)?;
		json_result(&json!({
			"level": level.to_ascii_lowercase(),
			"attribute_preset": preset.to_ascii_lowercase(),
			"attributes": attributes,
		}))
	}

	#[tool(description = "Move a DICOM series from the current node to another node using C-MOVE")]
	async fn move_series(
		&self,
		Parameters(params): Parameters<MoveSeriesParams>,
	) -> Result<CallToolResult, ErrorData> {
		let destination = self.destination_aet(&params.destination_node)?;
		let series_instance_uid = not_blank("series_instance_uid", &params.series_instance_uid)?;
		let study_instance_uid = Some(params.study_instance_uid.trim()).filter(|uid| !uid.is_empty());
		info!(%destination, series_instance_uid, "Moving series");

		let request = CompositeMoveRequest::new(next_message_id(), destination)
			.series(study_instance_uid, series_instance_uid);
		self.run_move(request).await
	}

	#[tool(description = "Move an entire DICOM study from the current node to another node using C-MOVE")]
	async fn move_study(
		&self,
		Parameters(params): Parameters<MoveStudyParams>,
	) -> Result<CallToolResult, ErrorData> {
		let destination = self.destination_aet(&params.destination_node)?;
		let study_instance_uid = not_blank("study_instance_uid", &params.study_instance_uid)?;
		info!(%destination, study_instance_uid, "Moving study");

		let request = CompositeMoveRequest::new(next_message_id(), destination).study(study_instance_uid);
		self.run_move(request).await
	}

	#[tool(description = "Retrieve an Encapsulated PDF instance from the current node and extract its text")]
	async fn extract_pdf_text_from_dicom(
		&self,
		Parameters(params): Parameters<ExtractPdfParams>,
	) -> Result<CallToolResult, ErrorData> {
		let retriever = self.retriever()?;
		let study_instance_uid = not_blank("study_instance_uid", &params.study_instance_uid)?;
		let series_instance_uid = not_blank("series_instance_uid", &params.series_instance_uid)?;
		let sop_instance_uid = not_blank("sop_instance_uid", &params.sop_instance_uid)?;
		let (name, node) = self.state.nodes.current()?;
		info!(node = %name, sop_instance_uid, "Retrieving PDF instance");

		let movescu = MoveServiceClassUser::new(self.state.calling_aet.clone(), node, self.state.timeout);
		let request = CompositeMoveRequest::new(next_message_id(), retriever.aet().clone()).instance(
			study_instance_uid,
			series_instance_uid,
			sop_instance_uid,
		);
		let retrieval = match retriever.retrieve(&movescu, request).await {
			Ok(retrieval) => retrieval,
			Err(err) => {
				warn!(error = %err, "Instance could not be retrieved");
				return json_result(&PdfText::failed(
					sop_instance_uid,
					format!("Failed to retrieve DICOM instance: {err}"),
				));
			}
		};

		let Some(instance) = retrieval
			.instances
			.into_iter()
			.find(|instance| instance.sop_instance_uid == sop_instance_uid)
		else {
			let message = if retrieval.outcome.success {
				String::from("Failed to retrieve DICOM instance: instance was not received")
			} else {
				retrieval.outcome.message
			};
			return json_result(&PdfText::failed(sop_instance_uid, message));
		};

		let extraction = tokio::task::spawn_blocking(move || pdf::extract_text(&instance.data))
			.await
			.map_err(|err| ErrorData::internal_error(err.to_string(), None))?;
		let result = match extraction {
			Ok(text_content) => PdfText {
				success: true,
				message: String::from("Successfully extracted text from PDF in DICOM"),
				text_content,
				sop_instance_uid: sop_instance_uid.to_owned(),
			},
			Err(err) => PdfText::failed(sop_instance_uid, err.to_string()),
		};
		json_result(&result)
	}

	#[tool(description = "Search FHIR resources of a type with optional search parameters")]
	async fn fhir_search(
		&self,
		Parameters(params): Parameters<FhirSearchParams>,
	) -> Result<CallToolResult, ErrorData> {
		let fhir = self.fhir()?;
		let resource_type = not_blank("resource_type", &params.resource_type)?;
		let search: Vec<(String, String)> = params.params.into_iter().collect();
		json_result(&fhir.search(resource_type, &search).await?)
	}

	#[tool(description = "Read a single FHIR resource by type and id")]
	async fn fhir_read(
		&self,
		Parameters(params): Parameters<FhirReadParams>,
	) -> Result<CallToolResult, ErrorData> {
		let fhir = self.fhir()?;
		let resource_type = not_blank("resource_type", &params.resource_type)?;
		let resource_id = not_blank("resource_id", &params.resource_id)?;
		json_result(&fhir.read(resource_type, resource_id).await?)
	}

	#[tool(description = "Create a FHIR resource. Transaction and batch bundles are sent to the server base.")]
	async fn fhir_create(
		&self,
		Parameters(params): Parameters<FhirResourceParams>,
	) -> Result<CallToolResult, ErrorData> {
		json_result(&self.fhir()?.create(&params.resource).await?)
	}

	#[tool(description = "Update an existing FHIR resource. The resource must include its id.")]
	async fn fhir_update(
		&self,
		Parameters(params): Parameters<FhirResourceParams>,
	) -> Result<CallToolResult, ErrorData> {
		json_result(&self.fhir()?.update(&params.resource).await?)
	}

	#[tool(description = "Verify connectivity to the FHIR server by reading its capability statement")]
	async fn verify_fhir_connection(&self) -> Result<CallToolResult, ErrorData> {
		json_result(&self.fhir()?.verify_connection().await)
	}

	#[tool(description = "Check the connection to the mini-RIS database")]
	async fn ris_ping(&self) -> Result<CallToolResult, ErrorData> {
		json_result(&self.ris()?.ping().await?)
	}

	#[tool(description = "List patients of the mini-RIS, optionally filtered by MRN or name")]
	async fn ris_list_patients(
		&self,
		Parameters(params): Parameters<RisListPatientsParams>,
	) -> Result<CallToolResult, ErrorData> {
		let ris = self.ris()?;
		let filter = PatientFilter {
			mrn: Some(params.mrn).filter(|mrn| !mrn.trim().is_empty()),
			name_query: Some(params.name_query).filter(|name| !name.trim().is_empty()),
			limit: params.limit,
			offset: params.offset,
		};
		json_result(&ris.list_patients(filter).await?)
	}
}

#[tool_handler]
impl ServerHandler for DicomMcpServer {
	fn get_info(&self) -> ServerInfo {
		ServerInfo {
			protocol_version: ProtocolVersion::LATEST,
			capabilities: ServerCapabilities::builder().enable_tools().build(),
			server_info: Implementation::from_build_env(),
			instructions: Some(String::from(
				"Query DICOM nodes (patients, studies, series, instances) with attribute presets, \
				 move data between nodes with C-MOVE, extract the text of encapsulated PDF reports, \
				 and access the configured FHIR server and mini-RIS database.",
			)),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::{DicomConfig, DicomNodeConfig, ReceiverConfig};
	use crate::nodes::NodeRegistry;
	use crate::query::catalog::AttributeCatalog;
	use pretty_assertions::assert_eq;
	use rmcp::model::ErrorCode;
	use serde_json::Value;
	use std::collections::BTreeMap;
	use std::net::{IpAddr, Ipv4Addr};
	use std::time::Duration;

	fn server() -> DicomMcpServer {
		let dicom = DicomConfig {
			calling_aet: AE::from("DICOM-MCP"),
			current_node: Some(String::from("orthanc")),
			timeout: 100,
			nodes: BTreeMap::from([
				(
					String::from("orthanc"),
					DicomNodeConfig {
						host: String::from("127.0.0.1"),
						port: 4242,
						aet: AE::from("ORTHANC"),
						description: String::from("Local Orthanc"),
					},
				),
				(
					String::from("archive"),
					DicomNodeConfig {
						host: String::from("127.0.0.1"),
						port: 104,
						aet: AE::from("ARCHIVE"),
						description: String::new(),
					},
				),
			]),
			receiver: None,
		};
		DicomMcpServer::new(Arc::new(McpState {
			catalog: Arc::new(AttributeCatalog::standard()),
			nodes: NodeRegistry::new(&dicom).unwrap(),
			calling_aet: dicom.calling_aet.clone(),
			timeout: Duration::from_millis(100),
			retriever: None,
			fhir: None,
			ris: None,
		}))
	}

	fn content(result: &CallToolResult) -> Value {
		let result = serde_json::to_value(result).unwrap();
		let text = result["content"][0]["text"].as_str().unwrap();
		serde_json::from_str(text).unwrap()
	}

	fn preset() -> PresetParams {
		PresetParams::default()
	}

	#[tokio::test]
	async fn lists_nodes_with_the_current_one() {
		let server = server();

		let listing = content(&server.list_dicom_nodes().await.unwrap());

		assert_eq!(listing["current_node"], "orthanc");
		assert_eq!(listing["calling_aet"], "DICOM-MCP");
		assert_eq!(listing["nodes"][0]["name"], "archive");
		assert_eq!(listing["nodes"][1]["is_current"], true);
	}

	#[tokio::test]
	async fn switching_nodes_changes_the_current_node() {
		let server = server();

		server
			.switch_dicom_node(Parameters(SwitchNodeParams {
				node_name: String::from("archive"),
			}))
			.await
			.unwrap();
		let unknown = server
			.switch_dicom_node(Parameters(SwitchNodeParams {
				node_name: String::from("nowhere"),
			}))
			.await
			.unwrap_err();

		assert_eq!(unknown.code, ErrorCode::INVALID_PARAMS);
		assert_eq!(server.state.nodes.current().unwrap().0, "archive");
	}

	#[tokio::test]
	async fn presets_are_grouped_by_tier_and_level() {
		let presets = content(
			&server()
				.get_attribute_presets(Parameters(AttributePresetsParams::default()))
				.await
				.unwrap(),
		);

		let minimal_patient: Vec<&str> = presets["minimal"]["patient"]
			.as_array()
			.unwrap()
			.iter()
			.filter_map(Value::as_str)
			.collect();
		assert_eq!(
			minimal_patient,
			vec!["PatientID", "PatientName", "PatientBirthDate", "PatientSex"]
		);
		assert!(presets["extended"]["instance"].as_array().unwrap().len() > 3);
	}

	#[tokio::test]
	async fn presets_can_be_listed_for_one_level() {
		let server = server();
		let params = AttributePresetsParams {
			level: String::from("Image"),
			attribute_preset: String::from("minimal"),
		};

		let listing = content(&server.get_attribute_presets(Parameters(params)).await.unwrap());
		let unknown = server
			.get_attribute_presets(Parameters(AttributePresetsParams {
				level: String::from("worklist"),
				..AttributePresetsParams::default()
			}))
			.await
			.unwrap_err();

		assert_eq!(listing["level"], "image");
		assert_eq!(
			listing["attributes"],
			json!(["SOPInstanceUID", "SeriesInstanceUID", "InstanceNumber"])
		);
		assert_eq!(unknown.code, ErrorCode::INVALID_PARAMS);
	}

	#[tokio::test]
	async fn series_query_requires_the_study() {
		let params = QuerySeriesParams {
			study_instance_uid: String::from("  "),
			modality: String::from("CT"),
			preset: preset(),
			..QuerySeriesParams::default()
		};

		let error = server().query_series(Parameters(params)).await.unwrap_err();

		assert_eq!(error.code, ErrorCode::INVALID_PARAMS);
		assert!(error.message.contains("StudyInstanceUID"));
	}

	#[tokio::test]
	async fn unknown_preset_is_rejected_before_querying() {
		let params = QueryPatientsParams {
			preset: PresetParams {
				attribute_preset: String::from("everything"),
				..preset()
			},
			..QueryPatientsParams::default()
		};

		let error = server().query_patients(Parameters(params)).await.unwrap_err();

		assert_eq!(error.code, ErrorCode::INVALID_PARAMS);
	}

	#[tokio::test]
	async fn fhir_and_ris_tools_require_configuration() {
		let server = server();

		let fhir = server.verify_fhir_connection().await.unwrap_err();
		let ris = server.ris_ping().await.unwrap_err();

		assert_eq!(fhir.code, ErrorCode::INVALID_REQUEST);
		assert_eq!(ris.code, ErrorCode::INVALID_REQUEST);
	}

	#[tokio::test]
	async fn pdf_extraction_requires_a_receiver() {
		let params = ExtractPdfParams {
			study_instance_uid: String::from("1"),
			series_instance_uid: String::from("1.2"),
			sop_instance_uid: String::from("1.2.3"),
		};

		let error = server()
			.extract_pdf_text_from_dicom(Parameters(params))
			.await
			.unwrap_err();

		assert_eq!(error.code, ErrorCode::INVALID_REQUEST);
		assert!(error.message.contains("[dicom.receiver]"));
	}

	#[tokio::test]
	async fn pdf_extraction_requires_every_uid() {
		let mut state = Arc::try_unwrap(server().state).unwrap();
		state.retriever = Some(InstanceRetriever::new(
			ReceiverConfig {
				aet: AE::from("DICOM-MCP"),
				interface: IpAddr::V4(Ipv4Addr::LOCALHOST),
				port: 0,
			},
			Duration::from_millis(100),
		));
		let server = DicomMcpServer::new(Arc::new(state));
		let params = ExtractPdfParams {
			study_instance_uid: String::from("1"),
			series_instance_uid: String::from(" "),
			sop_instance_uid: String::from("1.2.3"),
		};

		let error = server
			.extract_pdf_text_from_dicom(Parameters(params))
			.await
			.unwrap_err();

		assert_eq!(error.code, ErrorCode::INVALID_PARAMS);
		assert!(error.message.contains("series_instance_uid"));
	}

	#[test]
	fn destinations_resolve_configured_nodes() {
		let server = server();

		assert_eq!(server.destination_aet("archive").unwrap(), "ARCHIVE");
		assert_eq!(server.destination_aet("STORE_SCP").unwrap(), "STORE_SCP");
		assert!(server.destination_aet(" ").is_err());
	}
}
