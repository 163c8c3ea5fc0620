use crate::mcp::DicomMcpServer;
use crate::AppState;
use axum::Router;
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use rmcp::transport::streamable_http_server::StreamableHttpService;

mod home;
mod nodes;

/// HTTP routes. MCP sessions are served below `/mcp`, every session shares the same state.
pub fn routes(state: &AppState) -> Router<AppState> {
	let mcp = state.mcp.clone();
	let service = StreamableHttpService::new(
		move || Ok(DicomMcpServer::new(mcp.clone())),
		LocalSessionManager::default().into(),
		Default::default(),
	);

	Router::new()
		.merge(home::routes())
		.merge(nodes::routes())
		.nest_service("/mcp", service)
}
