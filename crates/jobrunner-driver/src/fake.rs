//! A deterministic, in-process container driver used by engine and API
//! tests. It never touches a real container runtime: it interprets a small
//! subset of shell commands well enough to reproduce the seed scenarios
//! (`sh -c "echo ... > FILE"`, `cat FILE`, `echo $VAR`, `sleep N`) and
//! threads a per-image virtual filesystem through `commit_container` the
//! same way the real engine threads committed images between steps.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::stream::BoxStream;
use futures::StreamExt;
use jobrunner_core::{
    ContainerDriver, ContainerEvent, ContainerEventStatus, ContainerId, Error, ImageId, Result,
};
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;

/// Binaries the fake shell knows how to run. Anything else fails at
/// `start_container`, mirroring a real daemon's "executable not found".
const KNOWN_BINARIES: &[&str] = &["sh", "echo", "cat", "sleep", "true", "false"];

type VirtualFs = HashMap<String, String>;

struct FakeContainer {
    cmd: Vec<String>,
    env: Vec<String>,
    base_fs: VirtualFs,
    exit_code: Mutex<Option<i64>>,
    result_fs: Mutex<Option<VirtualFs>>,
    log: Mutex<Vec<u8>>,
    notify: Arc<Notify>,
    natural_die: Mutex<Option<JoinHandle<()>>>,
}

pub struct FakeDriver {
    containers: Arc<Mutex<HashMap<String, FakeContainer>>>,
    images: Mutex<HashMap<String, VirtualFs>>,
    next_container: AtomicU64,
    next_image: AtomicU64,
    events_tx: broadcast::Sender<ContainerEvent>,
    unpullable_images: Vec<String>,
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDriver {
    pub fn new() -> Self {
        let (events_tx, _rx) = broadcast::channel(1024);
        Self {
            containers: Arc::new(Mutex::new(HashMap::new())),
            images: Mutex::new(HashMap::new()),
            next_container: AtomicU64::new(0),
            next_image: AtomicU64::new(0),
            events_tx,
            unpullable_images: vec!["doesnotexist".to_string()],
        }
    }

    fn emit(&self, container_id: &str, status: ContainerEventStatus) {
        let _ = self.events_tx.send(ContainerEvent {
            container_id: ContainerId(container_id.to_string()),
            status,
            timestamp: Utc::now(),
        });
    }

    async fn base_fs_for(&self, image: &str) -> VirtualFs {
        self.images.lock().await.get(image).cloned().unwrap_or_default()
    }

    /// Interpret one of the small set of commands the seed scenarios use.
    fn interpret(cmd: &[String], env: &[String], fs: &VirtualFs) -> (i64, Vec<u8>, VirtualFs) {
        let mut fs = fs.clone();
        let mut out = Vec::new();

        let env_map: HashMap<&str, &str> = env
            .iter()
            .filter_map(|tok| tok.split_once('='))
            .collect();

        match cmd.first().map(String::as_str) {
            Some("sh") if cmd.get(1).map(String::as_str) == Some("-c") => {
                let script = cmd.get(2).map(String::as_str).unwrap_or("");
                if let Some((rest, path)) = script.split_once(" > ") {
                    // echo "VALUE" > /path
                    let value = rest
                        .trim_start_matches("echo ")
                        .trim_matches('"')
                        .to_string();
                    fs.insert(path.trim().to_string(), format!("{value}\n"));
                    (0, out, fs)
                } else if let Some(var) = script.strip_prefix("echo $") {
                    let value = env_map.get(var).copied().unwrap_or("");
                    out.extend_from_slice(value.as_bytes());
                    out.push(b'\n');
                    (0, out, fs)
                } else {
                    (0, out, fs)
                }
            }
            Some("cat") => {
                let path = cmd.get(1).map(String::as_str).unwrap_or("");
                match fs.get(path) {
                    Some(content) => {
                        out.extend_from_slice(content.as_bytes());
                        (0, out, fs)
                    }
                    None => {
                        let msg = format!("cat: {path}: No such file or directory\n");
                        out.extend_from_slice(msg.as_bytes());
                        (1, out, fs)
                    }
                }
            }
            Some("echo") => {
                let msg = cmd[1..].join(" ");
                out.extend_from_slice(msg.as_bytes());
                out.push(b'\n');
                (0, out, fs)
            }
            Some("sleep") => (0, out, fs),
            Some("true") => (0, out, fs),
            Some("false") => (1, out, fs),
            _ => (127, out, fs),
        }
    }
}

#[async_trait]
impl ContainerDriver for FakeDriver {
    async fn pull_image(&self, image: &str) -> Result<()> {
        if self.unpullable_images.iter().any(|i| i == image) {
            return Err(Error::ExecutionFailed(format!("no such image: {image}")));
        }
        Ok(())
    }

    async fn create_container(
        &self,
        image: &str,
        cmd: &[String],
        env: &[String],
    ) -> Result<ContainerId> {
        let id = format!("fake-{}", self.next_container.fetch_add(1, Ordering::SeqCst));
        let base_fs = self.base_fs_for(image).await;

        let container = FakeContainer {
            cmd: cmd.to_vec(),
            env: env.to_vec(),
            base_fs,
            exit_code: Mutex::new(None),
            result_fs: Mutex::new(None),
            log: Mutex::new(Vec::new()),
            notify: Arc::new(Notify::new()),
            natural_die: Mutex::new(None),
        };
        self.containers.lock().await.insert(id.clone(), container);
        self.emit(&id, ContainerEventStatus::Create);
        Ok(ContainerId(id))
    }

    async fn start_container(&self, id: &ContainerId) -> Result<()> {
        let known = {
            let containers = self.containers.lock().await;
            let container = containers
                .get(&id.0)
                .ok_or_else(|| Error::NotFound(format!("no such container: {id}")))?;
            container
                .cmd
                .first()
                .map(|b| KNOWN_BINARIES.contains(&b.as_str()))
                .unwrap_or(false)
        };

        if !known {
            return Err(Error::ExecutionFailed(format!(
                "executable not found for container {id}"
            )));
        }

        self.emit(&id.0, ContainerEventStatus::Start);

        let delay = if self
            .containers
            .lock()
            .await
            .get(&id.0)
            .map(|c| c.cmd.first().map(String::as_str) == Some("sleep"))
            .unwrap_or(false)
        {
            Duration::from_millis(300)
        } else {
            Duration::from_millis(10)
        };

        let id = id.clone();
        let containers = Arc::clone(&self.containers);
        let events_tx = self.events_tx.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            finalize(&containers, &id, &events_tx).await;
        });

        if let Some(container) = self.containers.lock().await.get(&id.0) {
            *container.natural_die.lock().await = Some(handle);
        }

        Ok(())
    }

    async fn wait_container(&self, id: &ContainerId) -> Result<i64> {
        loop {
            let notify = {
                let containers = self.containers.lock().await;
                let container = containers
                    .get(&id.0)
                    .ok_or_else(|| Error::NotFound(format!("no such container: {id}")))?;
                if let Some(code) = *container.exit_code.lock().await {
                    return Ok(code);
                }
                container.notify.clone()
            };
            notify.notified().await;
        }
    }

    async fn stop_container(&self, id: &ContainerId, _grace: Duration) -> Result<()> {
        let containers = self.containers.lock().await;
        let container = containers
            .get(&id.0)
            .ok_or_else(|| Error::NotFound(format!("no such container: {id}")))?;

        if let Some(handle) = container.natural_die.lock().await.take() {
            handle.abort();
        }

        if container.exit_code.lock().await.is_some() {
            return Ok(());
        }

        *container.exit_code.lock().await = Some(143);
        *container.result_fs.lock().await = Some(container.base_fs.clone());
        container.notify.notify_waiters();
        drop(containers);

        self.emit(&id.0, ContainerEventStatus::Die);
        Ok(())
    }

    async fn commit_container(&self, id: &ContainerId) -> Result<ImageId> {
        let fs = {
            let containers = self.containers.lock().await;
            let container = containers
                .get(&id.0)
                .ok_or_else(|| Error::NotFound(format!("no such container: {id}")))?;
            container
                .result_fs
                .lock()
                .await
                .clone()
                .ok_or_else(|| Error::ExecutionFailed(format!("container {id} has not exited")))?
        };

        let image_id = format!("fake-img-{}", self.next_image.fetch_add(1, Ordering::SeqCst));
        self.images.lock().await.insert(image_id.clone(), fs);
        Ok(ImageId(image_id))
    }

    async fn container_logs(&self, id: &ContainerId) -> Result<BoxStream<'static, Result<Bytes>>> {
        let containers = self.containers.lock().await;
        let container = containers
            .get(&id.0)
            .ok_or_else(|| Error::NotFound(format!("no such container: {id}")))?;
        let bytes = Bytes::from(container.log.lock().await.clone());
        Ok(Box::pin(futures::stream::once(async move { Ok(bytes) })))
    }

    fn subscribe_events(&self) -> BoxStream<'static, ContainerEvent> {
        let rx = self.events_tx.subscribe();
        Box::pin(BroadcastStream::new(rx).filter_map(|r| async move { r.ok() }))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

async fn finalize(
    containers: &Mutex<HashMap<String, FakeContainer>>,
    id: &ContainerId,
    events_tx: &broadcast::Sender<ContainerEvent>,
) {
    let containers = containers.lock().await;
    let Some(container) = containers.get(&id.0) else {
        return;
    };
    if container.exit_code.lock().await.is_some() {
        return;
    }

    let (code, output, fs) = FakeDriver::interpret(&container.cmd, &container.env, &container.base_fs);
    container.log.lock().await.extend_from_slice(&output);
    *container.exit_code.lock().await = Some(code);
    *container.result_fs.lock().await = Some(fs);
    container.notify.notify_waiters();
    drop(containers);

    let _ = events_tx.send(ContainerEvent {
        container_id: id.clone(),
        status: ContainerEventStatus::Die,
        timestamp: Utc::now(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn happy_path_commands() {
        let driver = FakeDriver::new();
        driver.pull_image("ubuntu:14.04").await.unwrap();

        let write = driver
            .create_container(
                "ubuntu:14.04",
                &["sh".into(), "-c".into(), "echo \"test\" > /test.txt".into()],
                &[],
            )
            .await
            .unwrap();
        driver.start_container(&write).await.unwrap();
        assert_eq!(driver.wait_container(&write).await.unwrap(), 0);
        let image = driver.commit_container(&write).await.unwrap();

        let read = driver
            .create_container(&image.0, &["cat".into(), "/test.txt".into()], &[])
            .await
            .unwrap();
        driver.start_container(&read).await.unwrap();
        assert_eq!(driver.wait_container(&read).await.unwrap(), 0);

        let mut logs = driver.container_logs(&read).await.unwrap();
        let chunk = logs.next().await.unwrap().unwrap();
        assert_eq!(&chunk[..], b"test\n");
    }

    #[tokio::test]
    async fn missing_file_fails() {
        let driver = FakeDriver::new();
        let container = driver
            .create_container("ubuntu:14.04", &["cat".into(), "/notthere.txt".into()], &[])
            .await
            .unwrap();
        driver.start_container(&container).await.unwrap();
        assert_eq!(driver.wait_container(&container).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_binary_fails_start() {
        let driver = FakeDriver::new();
        let container = driver
            .create_container("ubuntu:14.04", &["notacommand".into()], &[])
            .await
            .unwrap();
        assert!(driver.start_container(&container).await.is_err());
    }

    #[tokio::test]
    async fn missing_image_fails_pull() {
        let driver = FakeDriver::new();
        assert!(driver.pull_image("doesnotexist").await.is_err());
    }
}
