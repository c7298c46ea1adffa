use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::AppState;
use hie_core::{RuntimeConfig, start_pipeline};

/// Main entry point for the HIE messaging server
///
/// Starts the delivery worker and serves the REST API until interrupted, then lets queued
/// deliveries finish before exiting.
///
/// # Environment Variables
/// - `HIE_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `HIE_DATA_DIR`: ledger and configuration root (default: "hie_data")
/// - `HIE_TEST_ENDPOINT` / `HIE_PRODUCTION_ENDPOINT`: exchange endpoints per environment
/// - `HIE_BACKOFF_UNIT_MS`, `HIE_MAX_CONCURRENT_DELIVERIES`, `HIE_DELIVERY_TIMEOUT_SECS`
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hie=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let runtime = RuntimeConfig::from_env_values(|key| std::env::var(key).ok())?;
    let rest_addr = std::env::var("HIE_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

    let (service, worker) = start_pipeline(&runtime)?;
    let app = api_rest::router(AppState { service });

    tracing::info!("++ Starting HIE REST on {}", rest_addr);
    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "could not listen for shutdown signal");
            }
        })
        .await?;

    // The router and its service clones are gone once serve returns.
    tracing::info!("-- REST stopped, waiting for queued deliveries");
    worker.shutdown().await;
    Ok(())
}
