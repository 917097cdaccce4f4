//! Job runner API server.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use jobrunner_api::{routes, webhook, AppState};
use jobrunner_bus::{ContainerEventBus, StopBus};
use jobrunner_core::ContainerDriver;
use jobrunner_driver::{DockerDriver, FakeDriver};
use jobrunner_engine::{EngineConfig, JobManager};
use jobrunner_store::InMemoryJobStore;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Selects which [`ContainerDriver`] backs the server. `docker` talks to a
/// real daemon; `fake` runs the deterministic in-memory driver, useful for
/// exercising the API without Docker installed.
fn driver_from_env() -> anyhow::Result<Arc<dyn ContainerDriver>> {
    match std::env::var("JOBRUNNER_DRIVER")
        .unwrap_or_else(|_| "docker".to_string())
        .to_lowercase()
        .as_str()
    {
        "fake" => {
            warn!("using the in-memory fake container driver, not a real daemon");
            Ok(Arc::new(FakeDriver::new()))
        }
        other => {
            if other != "docker" {
                warn!(requested = %other, "unknown JOBRUNNER_DRIVER value, defaulting to docker");
            }
            Ok(Arc::new(DockerDriver::connect()?))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let driver = driver_from_env()?;
    let store = Arc::new(InMemoryJobStore::new());
    let container_bus = Arc::new(ContainerEventBus::spawn(driver.clone()));
    let stop_bus = StopBus::new();
    let config = EngineConfig::from_env();
    let http_client = webhook::client();

    let on_terminal: Arc<dyn Fn(jobrunner_core::Job) + Send + Sync> = {
        let http_client = http_client.clone();
        Arc::new(move |job| webhook::send(http_client.clone(), job))
    };

    let manager = JobManager::spawn(
        store.clone(),
        driver.clone(),
        container_bus,
        stop_bus,
        config,
        on_terminal,
    );

    let state = AppState {
        store,
        driver,
        manager,
        http_client,
    };

    let app = routes::router(state).layer(TraceLayer::new_for_http()).layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    );

    let bind_addr = std::env::var("JOBRUNNER_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:4321".to_string());
    let addr = SocketAddr::from_str(&bind_addr)
        .unwrap_or_else(|e| panic!("invalid JOBRUNNER_BIND_ADDR {bind_addr:?}: {e}"));
    info!(%addr, "starting job runner API");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
