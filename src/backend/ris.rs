use crate::config::RisConfig;
use serde::Serialize;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::{FromRow, MySql, QueryBuilder};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument};

pub const DEFAULT_LIMIT: i64 = 25;
pub const MAX_LIMIT: i64 = 100;

const PATIENT_COLUMNS: &str = "SELECT \
	CAST(patient_id AS SIGNED) AS patient_id, \
	mrn, \
	given_name, \
	family_name, \
	CAST(date_of_birth AS CHAR) AS date_of_birth, \
	sex, \
	country_code, \
	preferred_language, \
	phone, \
	email, \
	city, \
	state, \
	postal_code, \
	CAST(created_at AS CHAR) AS created_at, \
	CAST(updated_at AS CHAR) AS updated_at \
	FROM patients";

/// Client for the patient registry of the mini-RIS database.
#[derive(Debug, Clone)]
pub struct MiniRisClient {
	pool: MySqlPool,
}

#[derive(Debug, Error)]
pub enum RisError {
	#[error("Mini-RIS database error: {0}")]
	Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct RisPatient {
	pub patient_id: i64,
	pub mrn: Option<String>,
	pub given_name: Option<String>,
	pub family_name: Option<String>,
	pub date_of_birth: Option<String>,
	pub sex: Option<String>,
	pub country_code: Option<String>,
	pub preferred_language: Option<String>,
	pub phone: Option<String>,
	pub email: Option<String>,
	pub city: Option<String>,
	pub state: Option<String>,
	pub postal_code: Option<String>,
	pub created_at: Option<String>,
	pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PatientFilter {
	pub mrn: Option<String>,
	pub name_query: Option<String>,
	#[serde(skip)]
	pub limit: Option<i64>,
	#[serde(skip)]
	pub offset: Option<i64>,
}

impl PatientFilter {
	/// The page size, clamped to `1..=MAX_LIMIT`.
	pub fn limit(&self) -> i64 {
		self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
	}

	pub fn offset(&self) -> i64 {
		self.offset.unwrap_or(0).max(0)
	}

	fn to_query(&self) -> QueryBuilder<'static, MySql> {
		let mut query = QueryBuilder::new(PATIENT_COLUMNS);
		let mut keyword = " WHERE ";
		if let Some(mrn) = self.mrn.as_deref().filter(|mrn| !mrn.is_empty()) {
			query.push(keyword).push("mrn = ").push_bind(mrn.to_owned());
			keyword = " AND ";
		}
		if let Some(name) = self.name_query.as_deref().filter(|name| !name.is_empty()) {
			let pattern = format!("%{name}%");
			query
				.push(keyword)
				.push("(given_name LIKE ")
				.push_bind(pattern.clone())
				.push(" OR family_name LIKE ")
				.push_bind(pattern)
				.push(")");
		}
		query
			.push(" ORDER BY updated_at DESC LIMIT ")
			.push_bind(self.limit())
			.push(" OFFSET ")
			.push_bind(self.offset());
		query
	}
}

#[derive(Debug, Clone, Serialize)]
pub struct PatientListing {
	pub success: bool,
	pub count: usize,
	pub patients: Vec<RisPatient>,
	pub limit: i64,
	pub offset: i64,
	pub filters: PatientFilter,
}

#[derive(Debug, Clone, Serialize)]
pub struct PingResult {
	pub success: bool,
	pub message: String,
	pub alive: i64,
}

impl MiniRisClient {
	/// Creates the connection pool. Connections are opened on first use.
	pub fn new(config: &RisConfig) -> Result<Self, RisError> {
		let pool = MySqlPoolOptions::new()
			.max_connections(config.max_connections)
			.acquire_timeout(Duration::from_secs(config.acquire_timeout))
			.connect_lazy(&config.url)?;
		info!(max_connections = config.max_connections, "Initialized mini-RIS connection pool");
		Ok(Self { pool })
	}

	#[instrument(skip(self))]
	pub async fn ping(&self) -> Result<PingResult, RisError> {
		let (alive,): (i64,) = sqlx::query_as("SELECT CAST(1 AS SIGNED) AS alive")
			.fetch_one(&self.pool)
			.await?;
		Ok(PingResult {
			success: true,
			message: String::from("Mini-RIS database connection successful"),
			alive,
		})
	}

	#[instrument(skip(self))]
	pub async fn list_patients(&self, filter: PatientFilter) -> Result<PatientListing, RisError> {
		let patients = filter
			.to_query()
			.build_query_as::<RisPatient>()
			.fetch_all(&self.pool)
			.await?;
		debug!(count = patients.len(), "Listed mini-RIS patients");

		Ok(PatientListing {
			success: true,
			count: patients.len(),
			limit: filter.limit(),
			offset: filter.offset(),
			patients,
			filters: filter,
		})
	}
}
