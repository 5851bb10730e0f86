//! ThreatFlow Control Plane Server
//!
//! An async Rust server that compiles malware analysis workflows, runs
//! files through them against IntelOwl and returns per-result-node reports.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use threatflow_control_plane::{
    analysis::IntelOwlClient,
    config::{AppConfig, IntelOwlConfig},
    engine::{ExecutorConfig, VerdictRuleTable},
    handlers,
    schema::AnalyzerSchemaRegistry,
    services::{sweep_loop, WorkflowService},
    state::AppState,
};

/// Initialize tracing/logging.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,threatflow_control_plane=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build the application router with all routes.
fn build_router(state: AppState) -> Router {
    // CORS configuration - the editor is served from another origin
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    handlers::routes(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    init_tracing();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting ThreatFlow Control Plane"
    );

    let app_config = AppConfig::from_env().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load app config, using defaults");
        AppConfig::default()
    });

    let intelowl_config = IntelOwlConfig::from_env().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load IntelOwl config, using defaults");
        IntelOwlConfig::default()
    });

    tracing::info!(
        host = %app_config.host,
        port = app_config.port,
        debug = app_config.debug,
        intelowl = %intelowl_config.url,
        "Configuration loaded"
    );

    let registry = Arc::new(AnalyzerSchemaRegistry::load(app_config.schema_path.as_deref())?);
    let rules = Arc::new(VerdictRuleTable::load(app_config.rules_path.as_deref())?);
    let client = Arc::new(IntelOwlClient::new(&intelowl_config)?);

    let workflows = WorkflowService::new(
        client,
        rules,
        registry,
        ExecutorConfig::from(&intelowl_config),
    );
    let state = AppState::new(app_config.clone(), workflows);

    let sweeper = tokio::spawn(sweep_loop(
        state.runs.clone(),
        Duration::from_secs(app_config.run_sweep_interval.max(1)),
    ));

    let shutdown = state.shutdown.clone();
    let app = build_router(state);

    // Bind to address
    let addr: SocketAddr = app_config.bind_address().parse()?;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(address = %addr, "Server listening");

    // Run the server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // in-flight runs stop before their next stage
            shutdown.cancel();
        })
        .await?;

    sweeper.abort();
    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
