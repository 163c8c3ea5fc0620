use crate::AppState;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

pub fn routes() -> Router<AppState> {
	Router::new()
		.route("/", get(index))
		.route("/health", get(health))
}

async fn index() -> impl IntoResponse {
	format!(
		"This server is running dicom-mcp (v{}). MCP clients connect to /mcp.",
		env!("CARGO_PKG_VERSION")
	)
}

async fn health() -> impl IntoResponse {
	(StatusCode::OK, "OK")
}
