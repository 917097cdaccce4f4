//! Application state shared across every handler.

use std::sync::Arc;

use jobrunner_core::ContainerDriver;
use jobrunner_engine::JobManager;
use jobrunner_store::InMemoryJobStore;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<InMemoryJobStore>,
    pub driver: Arc<dyn ContainerDriver>,
    pub manager: JobManager,
    pub http_client: reqwest::Client,
}
