//! Local Docker driver backed by `bollard`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, StartContainerOptions,
    StopContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::system::EventsOptions;
use bollard::Docker;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use jobrunner_core::{
    ContainerDriver, ContainerEvent, ContainerEventStatus, ContainerId, Error, ImageId, Result,
};
use tracing::{debug, info, warn};

/// Container driver talking to a local Docker daemon.
pub struct DockerDriver {
    docker: Docker,
}

impl DockerDriver {
    /// Connect using the environment's default Docker socket (`DOCKER_HOST`
    /// or the platform default).
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::Internal(format!("failed to connect to docker: {e}")))?;
        Ok(Self { docker })
    }

    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }
}

#[async_trait]
impl ContainerDriver for DockerDriver {
    async fn pull_image(&self, image: &str) -> Result<()> {
        info!(%image, "pulling image");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let mut pull_stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = pull_stream.next().await {
            result.map_err(|e| Error::ExecutionFailed(format!("failed to pull {image}: {e}")))?;
        }
        Ok(())
    }

    async fn create_container(
        &self,
        image: &str,
        cmd: &[String],
        env: &[String],
    ) -> Result<ContainerId> {
        let config = Config {
            image: Some(image.to_string()),
            cmd: Some(cmd.to_vec()),
            env: Some(env.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            ..Default::default()
        };

        let container = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await
            .map_err(|e| Error::ExecutionFailed(format!("failed to create container: {e}")))?;

        debug!(container_id = %container.id, "created container");
        Ok(ContainerId(container.id))
    }

    async fn start_container(&self, id: &ContainerId) -> Result<()> {
        self.docker
            .start_container(&id.0, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Error::ExecutionFailed(format!("failed to start container {id}: {e}")))
    }

    async fn wait_container(&self, id: &ContainerId) -> Result<i64> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.docker.wait_container(&id.0, Some(options));

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            Some(Err(e)) => Err(Error::ExecutionFailed(format!(
                "failed waiting for container {id}: {e}"
            ))),
            None => Err(Error::ExecutionFailed(format!(
                "wait stream for container {id} ended with no result"
            ))),
        }
    }

    async fn stop_container(&self, id: &ContainerId, grace: Duration) -> Result<()> {
        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };
        self.docker
            .stop_container(&id.0, Some(options))
            .await
            .map_err(|e| Error::ExecutionFailed(format!("failed to stop container {id}: {e}")))
    }

    async fn commit_container(&self, id: &ContainerId) -> Result<ImageId> {
        let options = bollard::image::CommitContainerOptions {
            container: id.0.clone(),
            ..Default::default()
        };
        let result = self
            .docker
            .commit_container(options, Config::<String>::default())
            .await
            .map_err(|e| Error::ExecutionFailed(format!("failed to commit container {id}: {e}")))?;
        Ok(ImageId(result.id))
    }

    async fn container_logs(&self, id: &ContainerId) -> Result<BoxStream<'static, Result<Bytes>>> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let stream = self.docker.logs(&id.0, Some(options));

        let mapped = stream.map(|chunk| match chunk {
            Ok(LogOutput::StdOut { message })
            | Ok(LogOutput::StdErr { message })
            | Ok(LogOutput::Console { message })
            | Ok(LogOutput::StdIn { message }) => Ok(message),
            Err(e) => Err(Error::ExecutionFailed(format!("log stream error: {e}"))),
        });

        Ok(Box::pin(mapped))
    }

    fn subscribe_events(&self) -> BoxStream<'static, ContainerEvent> {
        let mut filters = HashMap::new();
        filters.insert("type".to_string(), vec!["container".to_string()]);
        let options = EventsOptions::<String> {
            filters,
            ..Default::default()
        };

        let stream = self.docker.events(Some(options));
        let mapped = stream.filter_map(|result| async move {
            let message = match result {
                Ok(m) => m,
                Err(e) => {
                    warn!(error = %e, "docker event stream error");
                    return None;
                }
            };
            let actor = message.actor?;
            let container_id = actor.id?;
            let action = message.action.unwrap_or_default();
            let timestamp = message
                .time
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
                .unwrap_or_else(Utc::now);

            Some(ContainerEvent {
                container_id: ContainerId(container_id),
                status: ContainerEventStatus::from_raw(&action),
                timestamp,
            })
        });

        Box::pin(mapped)
    }

    async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| Error::ExecutionFailed(format!("docker ping failed: {e}")))
    }
}

/// These tests need a real daemon on `DOCKER_HOST` (or the platform
/// default socket) and are skipped by default.
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore]
    async fn connects_and_pings() {
        let driver = DockerDriver::connect().unwrap();
        driver.ping().await.expect("daemon should respond");
    }

    #[tokio::test]
    #[ignore]
    async fn runs_a_container_to_completion() {
        let driver = DockerDriver::connect().unwrap();
        driver.pull_image("alpine:latest").await.unwrap();

        let id = driver
            .create_container(
                "alpine:latest",
                &["/bin/sh".to_string(), "-c".to_string(), "echo hello".to_string()],
                &[],
            )
            .await
            .unwrap();
        driver.start_container(&id).await.unwrap();
        let code = driver.wait_container(&id).await.unwrap();
        assert_eq!(code, 0);
    }

    #[tokio::test]
    #[ignore]
    async fn reports_nonzero_exit() {
        let driver = DockerDriver::connect().unwrap();
        driver.pull_image("alpine:latest").await.unwrap();

        let id = driver
            .create_container(
                "alpine:latest",
                &["/bin/sh".to_string(), "-c".to_string(), "exit 7".to_string()],
                &[],
            )
            .await
            .unwrap();
        driver.start_container(&id).await.unwrap();
        let code = driver.wait_container(&id).await.unwrap();
        assert_eq!(code, 7);
    }

    #[tokio::test]
    #[ignore]
    async fn stop_container_interrupts_a_sleep() {
        let driver = DockerDriver::connect().unwrap();
        driver.pull_image("alpine:latest").await.unwrap();

        let id = driver
            .create_container(
                "alpine:latest",
                &["sleep".to_string(), "300".to_string()],
                &[],
            )
            .await
            .unwrap();
        driver.start_container(&id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        driver
            .stop_container(&id, Duration::from_secs(2))
            .await
            .expect("should stop a running container");
        let code = driver.wait_container(&id).await.unwrap();
        assert_ne!(code, 0);
    }

    #[tokio::test]
    #[ignore]
    async fn commit_container_produces_a_usable_image() {
        let driver = DockerDriver::connect().unwrap();
        driver.pull_image("alpine:latest").await.unwrap();

        let id = driver
            .create_container(
                "alpine:latest",
                &[
                    "/bin/sh".to_string(),
                    "-c".to_string(),
                    "echo hi > /committed.txt".to_string(),
                ],
                &[],
            )
            .await
            .unwrap();
        driver.start_container(&id).await.unwrap();
        assert_eq!(driver.wait_container(&id).await.unwrap(), 0);

        let image = driver.commit_container(&id).await.unwrap();

        let reader = driver
            .create_container(&image.0, &["cat".to_string(), "/committed.txt".to_string()], &[])
            .await
            .unwrap();
        driver.start_container(&reader).await.unwrap();
        assert_eq!(driver.wait_container(&reader).await.unwrap(), 0);
    }
}
