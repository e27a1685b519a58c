//! Target Access Authenticator - 服务入口

use std::net::SocketAddr;
use std::sync::Arc;

use taa_bootstrap::{Infrastructure, init_runtime, shutdown_signal};
use taa_config::AppConfig;
use taa_telemetry::init_metrics;
use target_access::api::{AppState, routes};
use target_access::application::{AvailabilityProbe, RefreshOrchestrator};
use tower_http::trace::TraceLayer;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = std::env::var("TAA_CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
    let config = AppConfig::load(&config_dir)?;
    init_runtime(&config);
    let metrics = init_metrics()?;

    let infra = Infrastructure::from_config(config.clone()).await?;

    let orchestrator = Arc::new(RefreshOrchestrator::new(
        infra.store(),
        infra.access_source(),
        config.cache.ttl(),
    ));
    let availability = Arc::new(AvailabilityProbe::new(
        infra.store(),
        infra.upstream_probe(),
        config.cache.ping_ttl(),
    ));

    let mut state = AppState::new(orchestrator, availability).with_metrics(metrics);
    if let Some(key) = &config.query_key {
        state = state.with_query_key(key.clone());
    }

    let app = routes(state).layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!(
        %addr,
        ttl_secs = config.cache.ttl().as_secs(),
        ping_ttl_secs = config.cache.ping_ttl().as_secs(),
        "Starting target access service"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    infra.shutdown().await;
    info!("Service stopped");

    Ok(())
}
