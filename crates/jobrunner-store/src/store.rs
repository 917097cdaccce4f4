//! The in-memory job store.

use std::collections::HashMap;

use async_trait::async_trait;
use jobrunner_core::{Job, JobId};
use tokio::sync::RwLock;

use crate::error::{StoreError, StoreResult};

/// A concurrent mapping from job id to job record. `add`/`find`/`update` are
/// linearizable against each other.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Assign the next id, store `job` under it, and return the stored copy.
    /// Any `id` already set on `job` is overwritten.
    async fn add(&self, job: Job) -> Job;

    async fn find(&self, id: JobId) -> StoreResult<Job>;

    /// Replace the record by id. Fails with `NotFound` if absent.
    async fn update(&self, job: Job) -> StoreResult<()>;
}

/// In-memory implementation backed by a single `RwLock<HashMap>`, mirroring
/// the reference implementation's `sync.RWMutex`-guarded map. No persistence
/// across restarts: this scope never needed it.
pub struct InMemoryJobStore {
    inner: RwLock<Inner>,
}

struct Inner {
    next_id: u64,
    jobs: HashMap<JobId, Job>,
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                next_id: 0,
                jobs: HashMap::new(),
            }),
        }
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn add(&self, mut job: Job) -> Job {
        let mut inner = self.inner.write().await;
        let id = JobId(inner.next_id);
        inner.next_id += 1;
        job.id = id;
        inner.jobs.insert(id, job.clone());
        job
    }

    async fn find(&self, id: JobId) -> StoreResult<Job> {
        let inner = self.inner.read().await;
        inner.jobs.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn update(&self, job: Job) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.jobs.contains_key(&job.id) {
            return Err(StoreError::NotFound);
        }
        inner.jobs.insert(job.id, job);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobrunner_core::JobStatus;

    fn blank_job() -> Job {
        Job {
            id: JobId(0),
            image: "alpine".to_string(),
            env: Default::default(),
            cmds: vec![vec!["echo".to_string()]],
            status: JobStatus::Queued,
            results: vec![],
            containers: vec![],
            images: vec![],
            start_time: None,
            end_time: None,
            webhook_url: None,
            message: None,
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn add_assigns_monotonic_ids() {
        let store = InMemoryJobStore::new();
        let a = store.add(blank_job()).await;
        let b = store.add(blank_job()).await;
        assert_eq!(a.id, JobId(0));
        assert_eq!(b.id, JobId(1));
    }

    #[tokio::test]
    async fn find_unknown_id_fails() {
        let store = InMemoryJobStore::new();
        let err = store.find(JobId(42)).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn update_replaces_record() {
        let store = InMemoryJobStore::new();
        let mut job = store.add(blank_job()).await;
        job.status = JobStatus::Running;
        store.update(job.clone()).await.unwrap();

        let found = store.find(job.id).await.unwrap();
        assert_eq!(found.status, JobStatus::Running);
    }

    #[tokio::test]
    async fn update_unknown_id_fails() {
        let store = InMemoryJobStore::new();
        let mut job = blank_job();
        job.id = JobId(999);
        let err = store.update(job).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }
}
