//! The `ContainerDriver` trait: the abstract container runtime backend.
//!
//! Implementations live in `jobrunner-driver` (a real Docker backend and an
//! in-memory fake used by engine tests). This crate only defines the seam.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::id::{ContainerId, ImageId};
use crate::Result;

/// One container lifecycle event, as delivered by the driver's event source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEvent {
    pub container_id: ContainerId,
    pub status: ContainerEventStatus,
    pub timestamp: DateTime<Utc>,
}

/// The subset of Docker container event statuses the engine cares about,
/// plus a catch-all for everything else it observes but does not act on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerEventStatus {
    Create,
    Start,
    Die,
    Stop,
    Commit,
    Other(String),
}

impl ContainerEventStatus {
    pub fn from_raw(status: &str) -> Self {
        match status {
            "create" => Self::Create,
            "start" => Self::Start,
            "die" => Self::Die,
            "stop" => Self::Stop,
            "commit" => Self::Commit,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Abstraction over the container runtime. One implementation talks to a
/// real Docker daemon via `bollard`; a second, deterministic implementation
/// backs unit tests for the engine state machine.
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    /// Pull `image` into the local image store. Synchronous: does not return
    /// until the pull completes or fails.
    async fn pull_image(&self, image: &str) -> Result<()>;

    /// Create (but do not start) a container running `cmd` against `image`
    /// with the given `NAME=VALUE` environment tokens.
    async fn create_container(
        &self,
        image: &str,
        cmd: &[String],
        env: &[String],
    ) -> Result<ContainerId>;

    async fn start_container(&self, id: &ContainerId) -> Result<()>;

    /// Block until the container has exited and return its exit code.
    /// Used as the authoritative source of truth on a `die` event; the
    /// event payload itself is not trusted for the exit code.
    async fn wait_container(&self, id: &ContainerId) -> Result<i64>;

    /// Request the container stop, allowing `grace` for a clean shutdown
    /// before the driver escalates to a forced kill.
    async fn stop_container(&self, id: &ContainerId, grace: std::time::Duration) -> Result<()>;

    /// Commit the container's current filesystem state into a new image.
    async fn commit_container(&self, id: &ContainerId) -> Result<ImageId>;

    /// Stream the container's combined stdout+stderr, undemultiplexed.
    async fn container_logs(&self, id: &ContainerId) -> Result<BoxStream<'static, Result<bytes::Bytes>>>;

    /// A live stream of container lifecycle events for every container the
    /// driver knows about. The bus is responsible for fan-out and for
    /// re-establishing this stream if it terminates.
    fn subscribe_events(&self) -> BoxStream<'static, ContainerEvent>;

    /// Cheap connectivity check used by the readiness probe.
    async fn ping(&self) -> Result<()>;
}
