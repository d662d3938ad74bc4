//! An in-memory, scripted [`ContainerRuntime`] for tests.
//!
//! Containers are scripted by name suffix: a script registered under
//! `"build-main"` applies to any container whose fully-qualified name ends
//! with `-build-main`, which lets tests ignore the random execution moniker.
//! Every adapter call is recorded in a log the test can assert against.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::RuntimeError;
use crate::runtime::{ContainerRuntime, WaitChannels};
use crate::spec::{ContainerSpec, OutputChunk, OutputSource, PullProgress, WaitResponse};

/// One recorded adapter call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    ImagePresent(String),
    ImagePull(String),
    ContainerCreate(String),
    ContainerStart(String),
    ContainerAttach(String),
    ContainerWait(String),
    ContainerRemove { name: String, force: bool },
    VolumeCreate(String),
    VolumeRemove { name: String, force: bool },
}

/// Scripted behavior for one container.
#[derive(Debug, Clone, Default)]
pub struct ContainerScript {
    /// Exit status reported by the wait.
    pub exit_code: i64,
    /// Lines emitted on stdout (TTY output also uses this).
    pub stdout_lines: Vec<String>,
    /// Lines emitted on stderr.
    pub stderr_lines: Vec<String>,
    /// Simulated run time before the exit is reported.
    pub run_for: Duration,
    /// Never report an exit; the container "runs" until cancellation.
    pub never_exits: bool,
}

impl ContainerScript {
    pub fn exit(code: i64) -> Self {
        Self {
            exit_code: code,
            ..Default::default()
        }
    }

    pub fn says(line: &str) -> Self {
        Self {
            stdout_lines: vec![line.to_string()],
            ..Default::default()
        }
    }

    pub fn running_for(mut self, duration: Duration) -> Self {
        self.run_for = duration;
        self
    }

    pub fn hanging() -> Self {
        Self {
            never_exits: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
struct ContainerRecord {
    name: String,
    script: ContainerScript,
}

#[derive(Default)]
struct Inner {
    present_images: HashSet<String>,
    failing_pulls: HashSet<String>,
    scripts: HashMap<String, ContainerScript>,
    containers: HashMap<String, ContainerRecord>,
    specs: Vec<ContainerSpec>,
    calls: Vec<RuntimeCall>,
    next_id: u64,
    running: usize,
    max_running: usize,
}

impl Inner {
    fn script_for(&self, full_name: &str) -> ContainerScript {
        self.scripts
            .iter()
            .find(|(suffix, _)| {
                full_name == *suffix || full_name.ends_with(&format!("-{suffix}"))
            })
            .map(|(_, script)| script.clone())
            .unwrap_or_default()
    }
}

/// The scripted runtime. Cloning shares all state.
#[derive(Clone, Default)]
pub struct FakeRuntime {
    inner: Arc<Mutex<Inner>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an image as already present on the host.
    pub fn mark_present(&self, image: &str) {
        self.lock().present_images.insert(image.to_string());
    }

    /// Make pulls of the given image fail.
    pub fn fail_pulls_of(&self, image: &str) {
        self.lock().failing_pulls.insert(image.to_string());
    }

    /// Register a script for containers whose name ends with `-{suffix}`.
    pub fn script_container(&self, suffix: &str, script: ContainerScript) {
        self.lock().scripts.insert(suffix.to_string(), script);
    }

    /// Everything the engine asked the runtime to do, in order.
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.lock().calls.clone()
    }

    /// Fully-qualified names of created containers, in creation order.
    pub fn created_names(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RuntimeCall::ContainerCreate(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    /// Whether a container whose name ends with `-{suffix}` was created.
    pub fn created(&self, suffix: &str) -> bool {
        self.create_index(suffix).is_some()
    }

    /// Position of the matching create call within the call log.
    pub fn create_index(&self, suffix: &str) -> Option<usize> {
        self.calls().iter().position(|call| {
            matches!(call, RuntimeCall::ContainerCreate(name) if name.ends_with(&format!("-{suffix}")))
        })
    }

    /// Names of force-removed containers.
    pub fn removed_names(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RuntimeCall::ContainerRemove { name, force: true } => Some(name),
                _ => None,
            })
            .collect()
    }

    /// High-water mark of simultaneously running containers. Meaningful when
    /// the scripts involved declare a nonzero `run_for`, so starts are
    /// observed before exits.
    pub fn max_running(&self) -> usize {
        self.lock().max_running
    }

    /// The creation spec of the container whose name ends with `-{suffix}`.
    pub fn created_spec(&self, suffix: &str) -> Option<ContainerSpec> {
        self.lock()
            .specs
            .iter()
            .find(|spec| spec.name.ends_with(&format!("-{suffix}")))
            .cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("fake runtime state poisoned")
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn image_present(&self, image: &str) -> Result<bool, RuntimeError> {
        let mut inner = self.lock();
        inner.calls.push(RuntimeCall::ImagePresent(image.to_string()));
        Ok(inner.present_images.contains(image))
    }

    async fn image_pull(
        &self,
        image: &str,
    ) -> mpsc::Receiver<Result<PullProgress, RuntimeError>> {
        let (tx, rx) = mpsc::channel(8);
        let failing = {
            let mut inner = self.lock();
            inner.calls.push(RuntimeCall::ImagePull(image.to_string()));
            if inner.failing_pulls.contains(image) {
                true
            } else {
                inner.present_images.insert(image.to_string());
                false
            }
        };
        let image = image.to_string();
        tokio::spawn(async move {
            if failing {
                let _ = tx
                    .send(Err(RuntimeError::api(anyhow::anyhow!(
                        "manifest for {image} not found"
                    ))))
                    .await;
                return;
            }
            for status in [
                format!("Pulling from {image}"),
                "Download complete".to_string(),
                format!("Status: Downloaded newer image for {image}"),
            ] {
                if tx.send(Ok(PullProgress { status })).await.is_err() {
                    return;
                }
            }
        });
        rx
    }

    async fn container_create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let mut inner = self.lock();
        inner
            .calls
            .push(RuntimeCall::ContainerCreate(spec.name.clone()));
        inner.next_id += 1;
        let id = format!("ctr-{}", inner.next_id);
        inner.specs.push(spec.clone());
        let script = inner.script_for(&spec.name);
        inner.containers.insert(
            id.clone(),
            ContainerRecord {
                name: spec.name.clone(),
                script,
            },
        );
        Ok(id)
    }

    async fn container_start(&self, id: &str) -> Result<(), RuntimeError> {
        let mut inner = self.lock();
        let name = inner
            .containers
            .get(id)
            .map(|record| record.name.clone())
            .ok_or_else(|| RuntimeError::api(anyhow::anyhow!("no such container: {id}")))?;
        inner.calls.push(RuntimeCall::ContainerStart(name));
        inner.running += 1;
        inner.max_running = inner.max_running.max(inner.running);
        Ok(())
    }

    async fn container_attach(
        &self,
        id: &str,
    ) -> Result<mpsc::Receiver<OutputChunk>, RuntimeError> {
        let record = {
            let mut inner = self.lock();
            let record = inner
                .containers
                .get(id)
                .cloned()
                .ok_or_else(|| RuntimeError::api(anyhow::anyhow!("no such container: {id}")))?;
            inner
                .calls
                .push(RuntimeCall::ContainerAttach(record.name.clone()));
            record
        };
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            for line in &record.script.stdout_lines {
                let chunk = OutputChunk {
                    source: OutputSource::Stdout,
                    bytes: format!("{line}\n").into_bytes(),
                };
                if tx.send(chunk).await.is_err() {
                    return;
                }
            }
            for line in &record.script.stderr_lines {
                let chunk = OutputChunk {
                    source: OutputSource::Stderr,
                    bytes: format!("{line}\n").into_bytes(),
                };
                if tx.send(chunk).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }

    async fn container_wait(&self, id: &str) -> WaitChannels {
        let (senders, channels) = WaitChannels::pair();
        let record = {
            let mut inner = self.lock();
            let record = inner.containers.get(id).cloned();
            if let Some(ref record) = record {
                inner
                    .calls
                    .push(RuntimeCall::ContainerWait(record.name.clone()));
            }
            record
        };
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let Some(record) = record else {
                let _ = senders
                    .error
                    .send(RuntimeError::api(anyhow::anyhow!("no such container")));
                return;
            };
            if record.script.never_exits {
                // Hold the senders so the wait pends until the engine gives
                // up; dropping them would look like a daemon disconnect.
                let _keep = senders;
                std::future::pending::<()>().await;
                return;
            }
            tokio::time::sleep(record.script.run_for).await;
            {
                let mut inner = inner.lock().expect("fake runtime state poisoned");
                inner.running = inner.running.saturating_sub(1);
            }
            let _ = senders.response.send(WaitResponse {
                status_code: record.script.exit_code,
            });
        });
        channels
    }

    async fn container_remove(&self, id: &str, force: bool) -> Result<(), RuntimeError> {
        let mut inner = self.lock();
        let name = inner
            .containers
            .get(id)
            .map(|record| record.name.clone())
            .unwrap_or_else(|| id.to_string());
        inner.calls.push(RuntimeCall::ContainerRemove { name, force });
        inner.containers.remove(id);
        Ok(())
    }

    async fn volume_create(&self, name: &str) -> Result<(), RuntimeError> {
        self.lock()
            .calls
            .push(RuntimeCall::VolumeCreate(name.to_string()));
        Ok(())
    }

    async fn volume_remove(&self, name: &str, force: bool) -> Result<(), RuntimeError> {
        self.lock().calls.push(RuntimeCall::VolumeRemove {
            name: name.to_string(),
            force,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::WaitEvent;

    #[tokio::test]
    async fn scripted_exit_code_is_reported() {
        let runtime = FakeRuntime::new();
        runtime.script_container("job-main", ContainerScript::exit(7));
        let id = runtime
            .container_create(&ContainerSpec {
                name: "exec-1-job-main".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let channels = runtime.container_wait(&id).await;
        runtime.container_start(&id).await.unwrap();
        match channels.next_event().await {
            WaitEvent::Exited(resp) => assert_eq!(resp.status_code, 7),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn attach_streams_scripted_lines() {
        let runtime = FakeRuntime::new();
        runtime.script_container("demo", ContainerScript::says("hello"));
        let id = runtime
            .container_create(&ContainerSpec {
                name: "exec-foo-demo".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let mut rx = runtime.container_attach(&id).await.unwrap();
        let chunk = rx.recv().await.unwrap();
        assert_eq!(chunk.source, OutputSource::Stdout);
        assert_eq!(chunk.bytes, b"hello\n");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn pull_marks_image_present() {
        let runtime = FakeRuntime::new();
        assert!(!runtime.image_present("alpine").await.unwrap());
        let mut rx = runtime.image_pull("alpine").await;
        while rx.recv().await.is_some() {}
        assert!(runtime.image_present("alpine").await.unwrap());
    }

    #[tokio::test]
    async fn failing_pull_yields_an_error_item() {
        let runtime = FakeRuntime::new();
        runtime.fail_pulls_of("ghost:latest");
        let mut rx = runtime.image_pull("ghost:latest").await;
        let item = rx.recv().await.unwrap();
        assert!(item.is_err());
    }

    #[tokio::test]
    async fn call_log_records_removals() {
        let runtime = FakeRuntime::new();
        let id = runtime
            .container_create(&ContainerSpec {
                name: "exec-j-c".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        runtime.container_remove(&id, true).await.unwrap();
        assert_eq!(runtime.removed_names(), vec!["exec-j-c".to_string()]);
    }
}
