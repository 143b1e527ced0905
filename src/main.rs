use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::{AppState, router};
use forms_core::CoreConfig;
use forms_core::config::{intent_from_env_value, resolve_dir, strict_versions_from_env_value};
use forms_core::constants::{DEFAULT_FORMS_DIR, DEFAULT_REGISTRY_DIR};

/// Main entry point for the forms service
///
/// Loads `.env`, resolves the core configuration once and serves the REST API until Ctrl-C.
///
/// # Environment Variables
/// - `FORMS_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `FORMS_REGISTRY_DIR`: Packaged form registry (default: `form-registry/`)
/// - `FORMS_DIR`: Named form documents (default: `forms/`)
/// - `FORMS_DEFAULT_INTENT`: Intent used when a request names none (default: `*`)
/// - `FORMS_STRICT_VERSIONS`: Reject registry version misses instead of using the latest
///
/// # Returns
/// * `Ok(())` - If the server starts and shuts down cleanly
/// * `Err(anyhow::Error)` - If configuration, startup or serving fails
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("forms=info".parse()?)
                .add_directive("forms_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rest_addr = std::env::var("FORMS_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

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

    tracing::info!(
        "++ Loading forms from {} and registry from {}",
        cfg.forms_dir().display(),
        cfg.registry_dir().display()
    );
    let app = router(AppState::load(cfg)?);

    tracing::info!("++ Starting forms REST on {}", rest_addr);
    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("-- Shutting down");
        })
        .await?;

    Ok(())
}
