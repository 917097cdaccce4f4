//! The per-job state machine: drives one job from *queued* to a terminal
//! state by interleaving a command-token queue with the container-event and
//! stop-event buses.

use std::sync::Arc;

use jobrunner_bus::{ContainerEventBus, StopBus};
use jobrunner_core::{
    ContainerDriver, ContainerEvent, ContainerEventStatus, ContainerId, Job, JobId, JobStatus,
    StopRequest,
};
use jobrunner_store::{JobStore, JobUpdater};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;

/// One instance per job, spawned by [`crate::manager::JobManager`] and run
/// to completion on its own task.
pub struct JobRunner<S: JobStore> {
    job_id: JobId,
    image: String,
    cmds: Vec<Vec<String>>,
    env_tokens: Vec<String>,
    driver: Arc<dyn ContainerDriver>,
    updater: Arc<JobUpdater<S>>,
    config: EngineConfig,
}

impl<S: JobStore + 'static> JobRunner<S> {
    pub fn new(
        job: &Job,
        driver: Arc<dyn ContainerDriver>,
        updater: Arc<JobUpdater<S>>,
        config: EngineConfig,
    ) -> Self {
        Self {
            job_id: job.id,
            image: job.image.clone(),
            cmds: job.cmds.clone(),
            env_tokens: job.env_tokens(),
            driver,
            updater,
            config,
        }
    }

    /// Run to completion and invoke `on_terminal` exactly once with the
    /// job's final snapshot.
    pub async fn run(
        self,
        container_bus: Arc<ContainerEventBus>,
        stop_bus: Arc<StopBus>,
        on_terminal: Arc<dyn Fn(Job) + Send + Sync>,
    ) {
        let (mut container_rx, _container_sub) = container_bus.subscribe();
        let (mut stop_rx, _stop_sub) = stop_bus.subscribe();

        let job_id = self.job_id;
        let final_job = self.drive(&mut container_rx, &mut stop_rx).await;

        // Unsubscribing (above, via the dropped `_*_sub` guards at the end
        // of this scope) stops new deliveries, but anything already
        // in-flight to our channel must still be drained so the bus's
        // per-subscriber forwarding task never blocks on a full queue.
        tokio::spawn(async move { while container_rx.recv().await.is_some() {} });
        tokio::spawn(async move { while stop_rx.recv().await.is_some() {} });

        info!(%job_id, status = %final_job.status, "job reached terminal state");
        on_terminal(final_job);
    }

    async fn drive(
        &self,
        container_rx: &mut mpsc::Receiver<ContainerEvent>,
        stop_rx: &mut mpsc::Receiver<StopRequest>,
    ) -> Job {
        if let Err(e) = self
            .updater
            .set_status(self.job_id, JobStatus::Running, None)
            .await
        {
            warn!(job_id = %self.job_id, error = %e, "job missing from store at start");
        }

        if let Err(e) = self.driver.pull_image(&self.image).await {
            warn!(job_id = %self.job_id, error = %e, "image pull failed");
            return self.finish(JobStatus::Error, Some(e.to_string())).await;
        }

        // A stop requested while still queued is observed here, before any
        // container exists.
        if self.pending_stop(stop_rx) {
            return self.finish(JobStatus::Stopped, None).await;
        }

        let (cmd_tx, mut cmd_rx) = mpsc::channel::<()>(2);
        let _ = cmd_tx.try_send(());

        let mut cmd_index = 0usize;
        let mut current_container: Option<ContainerId> = None;
        let mut stopped = false;

        loop {
            tokio::select! {
                token = cmd_rx.recv() => {
                    let Some(()) = token else { break };

                    if stopped {
                        // Lost the race with the stop handler below: no
                        // container is in flight, nothing to wait on.
                        return self.finish(JobStatus::Stopped, None).await;
                    }

                    if cmd_index == self.cmds.len() {
                        return self.finish(JobStatus::Successful, None).await;
                    }

                    match self.run_next_cmd(cmd_index).await {
                        Ok(id) => current_container = Some(id),
                        Err(e) => {
                            warn!(job_id = %self.job_id, error = %e, "failed to launch container");
                            return self.finish(JobStatus::Error, Some(e.to_string())).await;
                        }
                    }
                }

                Some(event) = container_rx.recv() => {
                    if Some(&event.container_id) != current_container.as_ref() {
                        continue;
                    }

                    match event.status {
                        ContainerEventStatus::Start => {
                            let _ = self.updater.set_start_time(self.job_id, event.timestamp).await;
                        }
                        ContainerEventStatus::Die => {
                            match self.handle_die(&event, cmd_index, stopped, &cmd_tx).await {
                                DieOutcome::Continue(next_index) => cmd_index = next_index,
                                DieOutcome::Terminal(job) => return job,
                            }
                        }
                        ContainerEventStatus::Create
                        | ContainerEventStatus::Commit
                        | ContainerEventStatus::Stop
                        | ContainerEventStatus::Other(_) => {
                            debug!(job_id = %self.job_id, status = ?event.status, "observed container event");
                        }
                    }
                }

                Some(request) = stop_rx.recv() => {
                    if request.job_id != self.job_id {
                        continue;
                    }
                    if let Some(id) = &current_container {
                        if let Err(e) = self.driver.stop_container(id, self.config.stop_grace).await {
                            warn!(job_id = %self.job_id, error = %e, "stop_container failed");
                        }
                    }
                    stopped = true;
                    let _ = self.updater.set_status(self.job_id, JobStatus::Stopped, None).await;
                }
            }
        }

        self.updater
            .get(self.job_id)
            .await
            .unwrap_or_else(|_| panic!("job {} vanished from store", self.job_id))
    }

    async fn run_next_cmd(&self, cmd_index: usize) -> jobrunner_core::Result<ContainerId> {
        let job = self
            .updater
            .get(self.job_id)
            .await
            .map_err(|e| jobrunner_core::Error::Internal(e.to_string()))?;
        let image = job.base_image_for(cmd_index).to_string();
        let cmd = &self.cmds[cmd_index];

        let id = self
            .driver
            .create_container(&image, cmd, &self.env_tokens)
            .await?;
        let _ = self.updater.append_container(self.job_id, id.clone()).await;

        self.driver.start_container(&id).await?;
        Ok(id)
    }

    async fn handle_die(
        &self,
        event: &ContainerEvent,
        cmd_index: usize,
        stopped: bool,
        cmd_tx: &mpsc::Sender<()>,
    ) -> DieOutcome {
        let _ = self
            .updater
            .set_end_time(self.job_id, event.timestamp)
            .await;

        let exit = match self.driver.wait_container(&event.container_id).await {
            Ok(code) => code,
            Err(e) => {
                warn!(job_id = %self.job_id, error = %e, "wait_container failed after die event");
                return DieOutcome::Terminal(self.finish(JobStatus::Error, Some(e.to_string())).await);
            }
        };
        let _ = self.updater.append_result(self.job_id, exit).await;

        if stopped {
            return DieOutcome::Terminal(self.finish(JobStatus::Stopped, None).await);
        }

        if exit != 0 {
            let message = format!("command {cmd_index} exited with status {exit}");
            return DieOutcome::Terminal(self.finish(JobStatus::Failed, Some(message)).await);
        }

        match self.driver.commit_container(&event.container_id).await {
            Ok(image_id) => {
                let _ = self.updater.append_image(self.job_id, image_id).await;
                let _ = cmd_tx.try_send(());
                DieOutcome::Continue(cmd_index + 1)
            }
            Err(e) => {
                warn!(job_id = %self.job_id, error = %e, "commit_container failed");
                DieOutcome::Terminal(self.finish(JobStatus::Error, Some(e.to_string())).await)
            }
        }
    }

    /// Drain any stop request already queued for this job without blocking.
    fn pending_stop(&self, stop_rx: &mut mpsc::Receiver<StopRequest>) -> bool {
        loop {
            match stop_rx.try_recv() {
                Ok(request) if request.job_id == self.job_id => return true,
                Ok(_) => continue,
                Err(_) => return false,
            }
        }
    }

    async fn finish(&self, status: JobStatus, message: Option<String>) -> Job {
        match self.updater.set_status(self.job_id, status, message).await {
            Ok(job) => job,
            Err(e) => {
                warn!(job_id = %self.job_id, error = %e, "failed to persist terminal status");
                self.updater
                    .get(self.job_id)
                    .await
                    .unwrap_or_else(|_| panic!("job {} vanished from store", self.job_id))
            }
        }
    }
}

enum DieOutcome {
    Continue(usize),
    Terminal(Job),
}
