pub(crate) mod api;
pub(crate) mod backend;
pub(crate) mod config;
pub(crate) mod mcp;
pub(crate) mod nodes;
pub(crate) mod query;
pub(crate) mod types;

use crate::config::{AppConfig, HttpServerConfig, TransportKind};
use crate::mcp::{DicomMcpServer, McpState};
use axum::extract::Request;
use axum::response::Response;
use rmcp::transport::stdio;
use rmcp::ServiceExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::trace;
use tracing::{error, info, level_filters::LevelFilter, warn, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Logs go to stderr because stdout carries JSON-RPC messages in stdio mode.
fn init_logger(level: tracing::Level) {
	tracing_subscriber::registry()
		.with(
			tracing_subscriber::fmt::layer()
				.compact()
				.with_writer(std::io::stderr)
				.with_ansi(false)
				.with_file(false)
				.with_line_number(false)
				.with_target(false),
		)
		.with(
			EnvFilter::builder()
				.with_default_directive(LevelFilter::from_level(level).into())
				.from_env_lossy(),
		)
		.with(sentry::integrations::tracing::layer())
		.init();
}

#[derive(Clone)]
pub struct AppState {
	pub mcp: Arc<McpState>,
}

fn init_sentry(config: &AppConfig) -> sentry::ClientInitGuard {
	let guard = sentry::init((
		// An empty string will disable Sentry
		config.telemetry.sentry.as_deref().unwrap_or_default(),
		sentry::ClientOptions {
			release: sentry::release_name!(),
			traces_sample_rate: 1.0,
			..Default::default()
		},
	));

	if let Some(dsn) = &config.telemetry.sentry {
		info!(dsn, "Enabled Sentry for tracing and error tracking");
	};

	guard
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
	let config = AppConfig::new()?;
	init_logger(config.telemetry.level);

	// The Sentry client has to exist before the Tokio runtime, so #[tokio::main] cannot be used.
	// See https://docs.sentry.io/platforms/rust/#async-main-function
	let _sentry = init_sentry(&config);

	tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()?
		.block_on(async move {
			if let Err(error) = run(config).await {
				error!("Failed to run application due to error: {error:#}");
			}
		});
	Ok(())
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
	let state = Arc::new(McpState::new(&config)?);
	let (current_node, node) = state.nodes.current()?;
	info!(
		node = %current_node,
		aet = %node.aet,
		address = %node.address(),
		"Using DICOM node"
	);

	match config.server.transport {
		TransportKind::Stdio => serve_stdio(state).await,
		TransportKind::Http => serve_http(&config.server.http, state).await,
	}
}

async fn serve_stdio(state: Arc<McpState>) -> anyhow::Result<()> {
	info!("Serving MCP over stdio");
	let service = DicomMcpServer::new(state).serve(stdio()).await?;
	let reason = service.waiting().await?;
	info!(?reason, "MCP session ended");
	Ok(())
}

async fn serve_http(config: &HttpServerConfig, state: Arc<McpState>) -> anyhow::Result<()> {
	let app_state = AppState { mcp: state };
	let app = api::routes(&app_state)
		.layer(CorsLayer::permissive())
		.layer(axum::middleware::from_fn(add_common_headers))
		.layer(
			tower_http::trace::TraceLayer::new_for_http()
				.make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
				.on_request(trace::DefaultOnRequest::new().level(Level::INFO))
				.on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
		)
		.with_state(app_state);

	let addr = SocketAddr::from((config.interface, config.port));
	let listener = TcpListener::bind(addr).await?;

	info!("Serving MCP on http://{addr}/mcp");
	if config.graceful_shutdown {
		axum::serve(listener, app)
			.with_graceful_shutdown(shutdown_signal())
			.await?;
	} else {
		axum::serve(listener, app).await?;
	}

	Ok(())
}

async fn shutdown_signal() {
	let ctrl_c = async {
		if let Err(err) = signal::ctrl_c().await {
			warn!("Failed to listen for Ctrl-C: {err}");
			std::future::pending::<()>().await;
		}
	};

	#[cfg(unix)]
	let terminate = async {
		match signal::unix::signal(signal::unix::SignalKind::terminate()) {
			Ok(mut terminate) => {
				terminate.recv().await;
			}
			Err(err) => {
				warn!("Failed to listen for SIGTERM: {err}");
				std::future::pending::<()>().await;
			}
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		() = ctrl_c => {},
		() = terminate => {},
	}
	info!("Shutting down");
}

async fn add_common_headers(req: Request, next: axum::middleware::Next) -> Response {
	let mut response = next.run(req).await;
	let server_name = concat!("dicom-mcp/", env!("CARGO_PKG_VERSION"));
	let headers = response.headers_mut();
	headers.insert("Server", axum::http::HeaderValue::from_static(server_name));
	response
}
