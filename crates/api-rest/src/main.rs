//! Standalone REST API server binary.
//!
//! ## Purpose
//! Runs the REST API server on its own.
//!
//! ## Intended use
//! Useful for development when only the HTTP surface (with OpenAPI/Swagger UI) is needed. The
//! workspace's main `forms-run` binary reads the same environment and serves the same router.

use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::{router, AppState};
use forms_core::config::{intent_from_env_value, resolve_dir, strict_versions_from_env_value};
use forms_core::constants::{DEFAULT_FORMS_DIR, DEFAULT_REGISTRY_DIR};
use forms_core::CoreConfig;

/// Main entry point for the forms REST API server
///
/// # Environment Variables
/// - `FORMS_REST_ADDR`: Server address (default: "0.0.0.0:3000")
/// - `FORMS_REGISTRY_DIR`: Packaged form registry (default: `form-registry/`)
/// - `FORMS_DIR`: Named form documents (default: `forms/`)
/// - `FORMS_DEFAULT_INTENT`: Intent used when a request names none (default: `*`)
/// - `FORMS_STRICT_VERSIONS`: Reject registry version misses instead of using the latest
///
/// # Errors
/// Returns an error if:
/// - the logging/tracing configuration cannot be initialised,
/// - a configured directory is missing or holds malformed forms,
/// - the server address cannot be bound, or
/// - the HTTP server fails while running.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr = std::env::var("FORMS_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

    tracing::info!("-- Starting forms REST API on {}", addr);

    let registry_dir = resolve_dir(
        std::env::var("FORMS_REGISTRY_DIR").ok().map(PathBuf::from),
        DEFAULT_REGISTRY_DIR,
    )?;
    let forms_dir = resolve_dir(
        std::env::var("FORMS_DIR").ok().map(PathBuf::from),
        DEFAULT_FORMS_DIR,
    )?;
    let cfg = Arc::new(CoreConfig::new(
        registry_dir,
        forms_dir,
        intent_from_env_value(std::env::var("FORMS_DEFAULT_INTENT").ok()),
        strict_versions_from_env_value(std::env::var("FORMS_STRICT_VERSIONS").ok())?,
    )?);

    let app = router(AppState::load(cfg)?);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
