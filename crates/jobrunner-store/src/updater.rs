//! The Job Updater: the only mutator of persisted job records.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use jobrunner_core::{ContainerId, ImageId, Job, JobId, JobStatus};
use tracing::debug;

use crate::error::StoreResult;
use crate::store::JobStore;

/// Serializes field-level updates against the store. Each mutator is a
/// read-modify-write so concurrent appends from unrelated paths (the event
/// bus, the stop bus) never lose an update.
///
/// Terminal status writes are monotonic: once a job's status is terminal,
/// further `set_status` calls are ignored. A die event and a stop request
/// can race; the first writer to reach a terminal status wins.
pub struct JobUpdater<S: JobStore> {
    store: Arc<S>,
}

impl<S: JobStore> JobUpdater<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    async fn mutate(&self, id: JobId, f: impl FnOnce(&mut Job)) -> StoreResult<Job> {
        let mut job = self.store.find(id).await?;
        f(&mut job);
        self.store.update(job.clone()).await?;
        Ok(job)
    }

    /// Fetch the current snapshot without mutating it.
    pub async fn get(&self, id: JobId) -> StoreResult<Job> {
        self.store.find(id).await
    }

    /// Set `status`, unless the job is already in a terminal state.
    pub async fn set_status(
        &self,
        id: JobId,
        status: JobStatus,
        message: Option<String>,
    ) -> StoreResult<Job> {
        self.mutate(id, |job| {
            if job.status.is_terminal() {
                debug!(job_id = %id, current = %job.status, "ignoring status write on terminal job");
                return;
            }
            job.status = status;
            if message.is_some() {
                job.message = message;
            }
        })
        .await
    }

    /// Set `start_time` the first time a container for this job starts.
    pub async fn set_start_time(&self, id: JobId, at: DateTime<Utc>) -> StoreResult<Job> {
        self.mutate(id, |job| {
            if job.start_time.is_none() {
                job.start_time = Some(at);
            }
        })
        .await
    }

    /// Unlike `set_start_time`, this overwrites on every call: `end_time`
    /// tracks the most recent container death, not the first, so a
    /// multi-command job's `end_time` keeps advancing as each step dies.
    pub async fn set_end_time(&self, id: JobId, at: DateTime<Utc>) -> StoreResult<Job> {
        self.mutate(id, |job| {
            job.end_time = Some(at);
        })
        .await
    }

    pub async fn append_result(&self, id: JobId, exit_code: i64) -> StoreResult<Job> {
        self.mutate(id, |job| job.results.push(exit_code)).await
    }

    pub async fn append_container(&self, id: JobId, container_id: ContainerId) -> StoreResult<Job> {
        self.mutate(id, |job| job.containers.push(container_id))
            .await
    }

    pub async fn append_image(&self, id: JobId, image_id: ImageId) -> StoreResult<Job> {
        self.mutate(id, |job| job.images.push(image_id)).await
    }
}
