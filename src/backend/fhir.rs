use crate::config::FhirConfig;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, InvalidHeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::redirect::Policy;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

const FHIR_JSON: &str = "application/fhir+json";
const API_KEY_HEADER: &str = "apikey";

/// A minimal FHIR REST client speaking JSON.
#[derive(Debug, Clone)]
pub struct FhirClient {
	http: reqwest::Client,
	base: Url,
}

/// Result of a connectivity check against the capability statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
	pub success: bool,
	pub message: String,
}

#[derive(Debug, Error)]
pub enum FhirError {
	#[error("Invalid FHIR base URL: {0}")]
	Url(#[from] url::ParseError),
	#[error("FHIR base URL '{0}' cannot have path segments")]
	NotABase(String),
	#[error("Invalid API key: {0}")]
	ApiKey(#[from] InvalidHeaderValue),
	#[error(transparent)]
	Request(#[from] reqwest::Error),
	#[error("FHIR server returned error: {status} {body}")]
	Status { status: u16, body: String },
	#[error("Resource must include '{0}' field")]
	MissingField(&'static str),
	#[error("Invalid JSON in FHIR response: {0}")]
	Json(#[from] serde_json::Error),
}

impl FhirClient {
	pub fn new(config: &FhirConfig) -> Result<Self, FhirError> {
		let base = Url::parse(&config.base_url)?;
		if base.cannot_be_a_base() {
			return Err(FhirError::NotABase(config.base_url.clone()));
		}

		let mut headers = HeaderMap::new();
		headers.insert(ACCEPT, HeaderValue::from_static(FHIR_JSON));
		headers.insert(CONTENT_TYPE, HeaderValue::from_static(FHIR_JSON));
		if let Some(api_key) = &config.api_key {
			let mut value = HeaderValue::from_str(api_key)?;
			value.set_sensitive(true);
			headers.insert(HeaderName::from_static(API_KEY_HEADER), value);
		}

		if config.accept_invalid_certs {
			warn!(base_url = %base, "TLS certificate validation is disabled for the FHIR server");
		}

		let http = reqwest::Client::builder()
			.use_rustls_tls()
			.default_headers(headers)
			.timeout(Duration::from_secs(config.timeout))
			.redirect(Policy::limited(10))
			.danger_accept_invalid_certs(config.accept_invalid_certs)
			.build()?;

		Ok(Self { http, base })
	}

	/// The URL of a path below the base URL.
	fn url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
		let mut url = self.base.clone();
		if let Ok(mut path) = url.path_segments_mut() {
			path.pop_if_empty().extend(segments);
		}
		url
	}

	/// `GET {base}/{type}?params`
	#[instrument(skip(self, params))]
	pub async fn search(&self, resource_type: &str, params: &[(String, String)]) -> Result<Value, FhirError> {
		let mut url = self.url([resource_type]);
		if !params.is_empty() {
			url.query_pairs_mut().extend_pairs(params);
		}
		self.send(self.http.get(url)).await
	}

	/// `GET {base}/{type}/{id}`
	#[instrument(skip(self))]
	pub async fn read(&self, resource_type: &str, id: &str) -> Result<Value, FhirError> {
		self.send(self.http.get(self.url([resource_type, id]))).await
	}

	/// Creates a resource. Transaction and batch bundles are posted to the base URL.
	#[instrument(skip_all)]
	pub async fn create(&self, resource: &Value) -> Result<Value, FhirError> {
		let resource_type = resource_type(resource)?;
		let url = if resource_type == "Bundle" {
			match resource.get("type").and_then(Value::as_str) {
				Some("transaction" | "batch") => self.base.clone(),
				_ => self.url(["Bundle"]),
			}
		} else {
			self.url([resource_type])
		};
		debug!(resource_type, %url, "Creating FHIR resource");
		self.send(self.http.post(url).body(serde_json::to_vec(resource)?))
			.await
	}

	/// `PUT {base}/{type}/{id}`
	#[instrument(skip_all)]
	pub async fn update(&self, resource: &Value) -> Result<Value, FhirError> {
		let resource_type = resource_type(resource)?;
		let id = resource
			.get("id")
			.and_then(Value::as_str)
			.ok_or(FhirError::MissingField("id"))?;
		debug!(resource_type, id, "Updating FHIR resource");
		let body = serde_json::to_vec(resource)?;
		self.send(self.http.put(self.url([resource_type, id])).body(body))
			.await
	}

	/// Fetches the capability statement and reports the server's FHIR version.
	#[instrument(skip(self))]
	pub async fn verify_connection(&self) -> ConnectionStatus {
		match self.send(self.http.get(self.url(["metadata"]))).await {
			Ok(metadata) => {
				let version = metadata
					.get("fhirVersion")
					.and_then(Value::as_str)
					.unwrap_or("unknown");
				ConnectionStatus {
					success: true,
					message: format!("FHIR server connection successful (FHIR version: {version})"),
				}
			}
			Err(err) => {
				warn!(error = %err, "FHIR connection check failed");
				ConnectionStatus {
					success: false,
					message: describe_connection_error(&err),
				}
			}
		}
	}

	async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, FhirError> {
		let response = request.send().await?;
		let status = response.status();
		if !status.is_success() {
			let body = response.text().await.unwrap_or_default();
			return Err(FhirError::Status {
				status: status.as_u16(),
				body,
			});
		}

		let body = response.bytes().await?;
		if body.is_empty() {
			return Ok(Value::Null);
		}
		Ok(serde_json::from_slice(&body)?)
	}
}

fn resource_type(resource: &Value) -> Result<&str, FhirError> {
	resource
		.get("resourceType")
		.and_then(Value::as_str)
		.ok_or(FhirError::MissingField("resourceType"))
}

fn describe_connection_error(err: &FhirError) -> String {
	match err {
		FhirError::Request(err) if err.is_timeout() => String::from(
			"Connection to FHIR server timed out. Check network/firewall settings or server availability.",
		),
		FhirError::Request(err) if err.is_connect() => format!("Failed to connect to FHIR server: {err}"),
		FhirError::Status { .. } => err.to_string(),
		err => format!("Unexpected error: {err}"),
	}
}
