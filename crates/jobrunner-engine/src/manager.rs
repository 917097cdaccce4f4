//! The Job Manager: accepts new jobs and spawns one runner task per job.

use std::sync::Arc;

use jobrunner_bus::{ContainerEventBus, StopBus};
use jobrunner_core::{ContainerDriver, Job, JobId, StopRequest};
use jobrunner_store::{JobStore, JobUpdater};
use tokio::sync::mpsc;
use tracing::info;

use crate::config::EngineConfig;
use crate::runner::JobRunner;

const NEW_JOB_CHANNEL_CAPACITY: usize = 100;

/// Owns the new-job channel and the stop bus entry point. Every accepted job
/// is handed to a freshly spawned task running a [`JobRunner`]; the manager
/// imposes no concurrency limit of its own, jobs are independent.
#[derive(Clone)]
pub struct JobManager {
    new_job_tx: mpsc::Sender<Job>,
    stop_bus: StopBus,
}

impl JobManager {
    /// Start the dispatch loop and return a handle to it. `on_terminal` is
    /// invoked exactly once per job with its final snapshot; the caller
    /// (the API layer) uses it to fire the webhook.
    pub fn spawn<S: JobStore + 'static>(
        store: Arc<S>,
        driver: Arc<dyn ContainerDriver>,
        container_bus: Arc<ContainerEventBus>,
        stop_bus: StopBus,
        config: EngineConfig,
        on_terminal: Arc<dyn Fn(Job) + Send + Sync>,
    ) -> Self {
        let (new_job_tx, mut new_job_rx) = mpsc::channel::<Job>(NEW_JOB_CHANNEL_CAPACITY);
        let updater = Arc::new(JobUpdater::new(store));

        let dispatch_stop_bus = stop_bus.clone();
        tokio::spawn(async move {
            while let Some(job) = new_job_rx.recv().await {
                info!(job_id = %job.id, "dispatching job to a new runner");
                let runner = JobRunner::new(&job, driver.clone(), updater.clone(), config.clone());
                let container_bus = container_bus.clone();
                let stop_bus = Arc::new(dispatch_stop_bus.clone());
                let on_terminal = on_terminal.clone();
                tokio::spawn(async move {
                    runner.run(container_bus, stop_bus, on_terminal).await;
                });
            }
        });

        Self {
            new_job_tx,
            stop_bus,
        }
    }

    /// Hand a newly created job to the dispatch loop.
    pub async fn submit(&self, job: Job) -> Result<(), mpsc::error::SendError<Job>> {
        self.new_job_tx.send(job).await
    }

    /// Forward a stop request onto the stop bus.
    pub fn stop(&self, job_id: JobId) {
        self.stop_bus.publish(StopRequest { job_id });
    }
}
