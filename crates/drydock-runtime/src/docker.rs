//! [`ContainerRuntime`] over the local Docker daemon.

use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, Config, CreateContainerOptions, LogOutput, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::volume::CreateVolumeOptions;
use bollard::Docker;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::error::RuntimeError;
use crate::runtime::{ContainerRuntime, WaitChannels};
use crate::spec::{ContainerSpec, OutputChunk, OutputSource, PullProgress, WaitResponse};

/// Docker daemon client, connected via the platform default socket.
pub struct DockerRuntime {
    client: Docker,
}

impl DockerRuntime {
    /// Connect to the local daemon (honoring `DOCKER_HOST` and friends).
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Connection`] if the client cannot be built.
    pub fn connect() -> Result<Self, RuntimeError> {
        let client = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Connection(e.into()))?;
        Ok(Self { client })
    }
}

fn nonzero(value: i64) -> Option<i64> {
    (value != 0).then_some(value)
}

fn nonempty(values: &[String]) -> Option<Vec<String>> {
    (!values.is_empty()).then(|| values.to_vec())
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn image_present(&self, image: &str) -> Result<bool, RuntimeError> {
        match self.client.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(RuntimeError::api(e)),
        }
    }

    async fn image_pull(
        &self,
        image: &str,
    ) -> mpsc::Receiver<Result<PullProgress, RuntimeError>> {
        let (tx, rx) = mpsc::channel(16);
        let mut stream = self.client.create_image(
            Some(CreateImageOptions {
                from_image: image.to_string(),
                ..Default::default()
            }),
            None,
            None,
        );
        tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                let message = match item {
                    Ok(info) => Ok(PullProgress {
                        status: info.status.unwrap_or_default(),
                    }),
                    Err(e) => Err(RuntimeError::api(e)),
                };
                let failed = message.is_err();
                if tx.send(message).await.is_err() || failed {
                    break;
                }
            }
        });
        rx
    }

    async fn container_create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let host_config = HostConfig {
            binds: nonempty(&spec.binds),
            network_mode: spec.network_mode.clone(),
            privileged: Some(spec.privileged),
            memory: nonzero(spec.resources.memory_bytes),
            cpu_shares: nonzero(spec.resources.cpu_shares),
            cpu_period: nonzero(spec.resources.cpu_period),
            cpu_quota: nonzero(spec.resources.cpu_quota),
            cpu_count: nonzero(spec.resources.cpu_count),
            cpu_percent: nonzero(spec.resources.cpu_percent),
            ..Default::default()
        };
        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            working_dir: spec.working_dir.clone(),
            entrypoint: nonempty(&spec.entrypoint),
            cmd: nonempty(&spec.cmd),
            tty: Some(spec.tty),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            host_config: Some(host_config),
            ..Default::default()
        };
        let response = self
            .client
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(RuntimeError::api)?;
        Ok(response.id)
    }

    async fn container_start(&self, id: &str) -> Result<(), RuntimeError> {
        self.client
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(RuntimeError::api)
    }

    async fn container_attach(
        &self,
        id: &str,
    ) -> Result<mpsc::Receiver<OutputChunk>, RuntimeError> {
        let results = self
            .client
            .attach_container(
                id,
                Some(AttachContainerOptions::<String> {
                    stdout: Some(true),
                    stderr: Some(true),
                    stream: Some(true),
                    ..Default::default()
                }),
            )
            .await
            .map_err(RuntimeError::api)?;
        let mut output = results.output;
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            while let Some(item) = output.next().await {
                let chunk = match item {
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                        OutputChunk {
                            source: OutputSource::Stdout,
                            bytes: message.to_vec(),
                        }
                    }
                    Ok(LogOutput::StdErr { message }) => OutputChunk {
                        source: OutputSource::Stderr,
                        bytes: message.to_vec(),
                    },
                    Ok(LogOutput::StdIn { .. }) => continue,
                    Err(e) => {
                        tracing::debug!("attach stream ended: {e}");
                        break;
                    }
                };
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn container_wait(&self, id: &str) -> WaitChannels {
        let (senders, channels) = WaitChannels::pair();
        let mut stream = self.client.wait_container(
            id,
            Some(WaitContainerOptions {
                condition: "next-exit".to_string(),
            }),
        );
        tokio::spawn(async move {
            match stream.next().await {
                Some(Ok(resp)) => {
                    let _ = senders.response.send(WaitResponse {
                        status_code: resp.status_code,
                    });
                }
                // bollard reports non-zero exits as a dedicated error kind.
                Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => {
                    let _ = senders.response.send(WaitResponse { status_code: code });
                }
                Some(Err(e)) => {
                    let _ = senders.error.send(RuntimeError::api(e));
                }
                None => {}
            }
        });
        channels
    }

    async fn container_remove(&self, id: &str, force: bool) -> Result<(), RuntimeError> {
        self.client
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force,
                    ..Default::default()
                }),
            )
            .await
            .map_err(RuntimeError::api)
    }

    async fn volume_create(&self, name: &str) -> Result<(), RuntimeError> {
        self.client
            .create_volume(CreateVolumeOptions {
                name: name.to_string(),
                ..Default::default()
            })
            .await
            .map(|_| ())
            .map_err(RuntimeError::api)
    }

    async fn volume_remove(&self, name: &str, force: bool) -> Result<(), RuntimeError> {
        self.client
            .remove_volume(
                name,
                Some(bollard::volume::RemoveVolumeOptions { force }),
            )
            .await
            .map_err(RuntimeError::api)
    }
}
