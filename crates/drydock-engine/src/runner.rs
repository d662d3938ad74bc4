//! Per-job execution: container lifecycle, output streaming, cleanup.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::anyhow;
use drydock_config::{Container, Job, OsFamily, SourceMountMode};
use drydock_runtime::{ContainerSpec, OutputChunk, OutputSource, ResourceSpec, WaitEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::errors::ExecutionError;
use crate::orchestrator::Executor;
use crate::prefix::LinePrefixWriter;
use crate::resources;
use crate::source;

/// Convert an environment mapping to sorted `KEY=VALUE` pairs.
pub(crate) fn environment_map_to_slice(env: &BTreeMap<String, String>) -> Vec<String> {
    env.iter().map(|(k, v)| format!("{k}={v}")).collect()
}

impl Executor {
    /// Run one job to completion. Never returns before every container it
    /// created has been force-removed and any source scratch directory has
    /// been deleted.
    pub(crate) async fn execute_job(
        &self,
        ctx: &CancellationToken,
        secrets: &BTreeMap<String, String>,
        job_execution_name: &str,
        shared_storage_volume: Option<&str>,
        job: &Job,
    ) -> Result<(), ExecutionError> {
        // A per-job scope: cancelled by the outer token, and additionally by
        // the job's own timeout when one is declared.
        let job_ctx = ctx.child_token();
        let timeout_guard = spawn_timeout_guard(&job_ctx, job.timeout_seconds());

        let (job_source_path, scratch_dir) =
            self.provision_source(job_execution_name, job).await?;

        let mut container_ids: Vec<String> = vec![String::new(); 1 + job.sidecar_containers().len()];
        let result = self
            .run_job_containers(
                &job_ctx,
                secrets,
                job_execution_name,
                &job_source_path,
                shared_storage_volume,
                job,
                &mut container_ids,
            )
            .await;

        // Cleanup is never raced against cancellation.
        self.force_remove_containers(&container_ids).await;
        if let Some(path) = scratch_dir {
            remove_scratch_dir(path).await;
        }
        if let Some(guard) = timeout_guard {
            guard.abort();
        }
        result
    }

    /// Resolve the job's source path, copying the tree into a per-execution
    /// scratch directory when the job mounts source in COPY mode. Returns the
    /// effective source path and the scratch directory to delete afterwards.
    async fn provision_source(
        &self,
        job_execution_name: &str,
        job: &Job,
    ) -> Result<(PathBuf, Option<PathBuf>), ExecutionError> {
        let needs_copy = job.source_mount_mode() == SourceMountMode::Copy
            && job
                .containers()
                .any(|container| container.source_mount_path().is_some());
        if !needs_copy {
            return Ok((self.source_path.clone(), None));
        }

        let home = std::env::var("HOME")
            .map_err(|_| anyhow!("HOME is not set; cannot create job scratch directory"))?;
        let job_path = PathBuf::from(home)
            .join(".devdrake")
            .join("jobs")
            .join(job_execution_name);
        let src_path = job_path.join("src");

        let source = self.source_path.clone();
        let copy_target = src_path.clone();
        tokio::task::spawn_blocking(move || source::copy_dir(&source, &copy_target))
            .await
            .map_err(|e| anyhow!("source copy task panicked: {e}"))?
            .map_err(|e| {
                ExecutionError::infrastructure(
                    e,
                    format!("error copying source to {}", src_path.display()),
                )
            })?;

        Ok((src_path, Some(job_path)))
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_job_containers(
        &self,
        ctx: &CancellationToken,
        secrets: &BTreeMap<String, String>,
        job_execution_name: &str,
        source_path: &Path,
        shared_storage_volume: Option<&str>,
        job: &Job,
        container_ids: &mut [String],
    ) -> Result<(), ExecutionError> {
        self.print(format!("----> executing job \"{}\" <----", job.name()));

        // Sidecars first; the first one owns the job's network namespace.
        let mut network_container_id: Option<String> = None;
        for (index, sidecar) in job.sidecar_containers().iter().enumerate() {
            let id = self
                .create_container(
                    secrets,
                    job_execution_name,
                    source_path,
                    shared_storage_volume,
                    network_container_id.as_deref(),
                    job,
                    sidecar,
                )
                .await
                .map_err(|e| {
                    ExecutionError::infrastructure(
                        e,
                        format!(
                            "error creating sidecar container \"{}\" for job \"{}\"",
                            sidecar.name(),
                            job.name()
                        ),
                    )
                })?;
            container_ids[index] = id.clone();
            if index == 0 {
                network_container_id = Some(id.clone());
            }
            self.runtime.container_start(&id).await.map_err(|e| {
                ExecutionError::infrastructure(
                    e,
                    format!(
                        "error starting sidecar container \"{}\" for job \"{}\"",
                        sidecar.name(),
                        job.name()
                    ),
                )
            })?;
        }

        // The primary is created last and only started once its exit wait and
        // output stream are in place.
        let primary = job.primary_container();
        let primary_id = self
            .create_container(
                secrets,
                job_execution_name,
                source_path,
                shared_storage_volume,
                network_container_id.as_deref(),
                job,
                primary,
            )
            .await
            .map_err(|e| {
                ExecutionError::infrastructure(
                    e,
                    format!(
                        "error creating primary container \"{}\" for job \"{}\"",
                        primary.name(),
                        job.name()
                    ),
                )
            })?;
        let last = container_ids.len() - 1;
        container_ids[last] = primary_id.clone();

        let wait = self.runtime.container_wait(&primary_id).await;
        let attach_rx = self
            .runtime
            .container_attach(&primary_id)
            .await
            .map_err(|e| {
                ExecutionError::infrastructure(
                    e,
                    format!(
                        "error attaching to primary container \"{}\" for job \"{}\"",
                        primary.name(),
                        job.name()
                    ),
                )
            })?;
        let streamer = self.spawn_output_streamer(job.name(), primary.name(), primary.tty(), attach_rx);

        self.runtime.container_start(&primary_id).await.map_err(|e| {
            ExecutionError::infrastructure(
                e,
                format!(
                    "error starting primary container \"{}\" for job \"{}\"",
                    primary.name(),
                    job.name()
                ),
            )
        })?;

        let outcome = tokio::select! {
            event = wait.next_event() => match event {
                WaitEvent::Exited(resp) if resp.status_code != 0 => {
                    Err(ExecutionError::JobExitedNonZero {
                        job: job.name().to_string(),
                        exit_code: resp.status_code,
                    })
                }
                WaitEvent::Exited(_) => Ok(()),
                WaitEvent::Failed(err) => {
                    if ctx.is_cancelled() {
                        Err(ExecutionError::InProgressJobAborted {
                            job: job.name().to_string(),
                        })
                    } else {
                        Err(ExecutionError::infrastructure(
                            err,
                            format!(
                                "error waiting for completion of primary container \"{}\" for job \"{}\"",
                                primary.name(),
                                job.name()
                            ),
                        ))
                    }
                }
                WaitEvent::Closed => Err(ExecutionError::Infrastructure(anyhow!(
                    "runtime dropped the wait for primary container \"{}\" of job \"{}\"",
                    primary.name(),
                    job.name()
                ))),
            },
            () = ctx.cancelled() => Err(ExecutionError::InProgressJobAborted {
                job: job.name().to_string(),
            }),
        };

        match &outcome {
            // Drain remaining output so a completed job's lines always land.
            Ok(()) => {
                let _ = streamer.await;
            }
            Err(_) => streamer.abort(),
        }
        outcome
    }

    /// Create (but do not start) one container of a job.
    #[allow(clippy::too_many_arguments)]
    async fn create_container(
        &self,
        secrets: &BTreeMap<String, String>,
        job_execution_name: &str,
        source_path: &Path,
        shared_storage_volume: Option<&str>,
        network_container_id: Option<&str>,
        job: &Job,
        container: &Container,
    ) -> Result<String, drydock_runtime::RuntimeError> {
        // Secrets first; declared environment may shadow them.
        let mut env = secrets.clone();
        for (key, value) in container.environment() {
            env.insert(key.clone(), value.clone());
        }

        let declared = container.resources();
        let mut translated = ResourceSpec {
            memory_bytes: resources::memory_bytes(declared.memory.max_megabytes),
            ..Default::default()
        };
        let requested = declared.cpu.requested_millicores as i64;
        let max = declared.cpu.max_millicores as i64;
        match job.os_family() {
            OsFamily::Linux => {
                translated.cpu_shares = resources::cpu_shares_linux(requested);
                translated.cpu_period = resources::QUOTA_PERIOD;
                translated.cpu_quota = resources::cpu_quota_linux(max, resources::QUOTA_PERIOD);
            }
            OsFamily::Windows => {
                // HyperV isolation assumed.
                let hyperv = true;
                let cpus = resources::host_cpus();
                translated.cpu_shares = resources::cpu_shares_windows(requested, hyperv, cpus);
                translated.cpu_count = resources::cpu_count_windows(max, hyperv);
                translated.cpu_percent = resources::cpu_percent_windows(max, hyperv, cpus);
            }
        }

        let mut binds = Vec::new();
        if container.mount_docker_socket() {
            binds.push("/var/run/docker.sock:/var/run/docker.sock".to_string());
        }
        if let Some(mount_path) = container.source_mount_path() {
            let target = if job.source_mount_mode() == SourceMountMode::ReadOnly {
                format!("{mount_path}:ro")
            } else {
                mount_path.to_string()
            };
            binds.push(format!("{}:{}", source_path.display(), target));
        }
        if let Some(mount_path) = container.shared_storage_mount_path() {
            if let Some(volume) = shared_storage_volume {
                binds.push(format!("{volume}:{mount_path}"));
            }
        }

        let spec = ContainerSpec {
            name: format!("{job_execution_name}-{}", container.name()),
            image: container.image().to_string(),
            env: environment_map_to_slice(&env),
            working_dir: container.working_directory().map(str::to_string),
            entrypoint: container.command().to_vec(),
            cmd: container.args().to_vec(),
            tty: container.tty(),
            privileged: container.privileged(),
            network_mode: network_container_id.map(|id| format!("container:{id}")),
            binds,
            resources: translated,
        };
        self.runtime.container_create(&spec).await
    }

    fn spawn_output_streamer(
        &self,
        job_name: &str,
        container_name: &str,
        tty: bool,
        mut attach_rx: mpsc::Receiver<OutputChunk>,
    ) -> JoinHandle<()> {
        let mut out = LinePrefixWriter::new(job_name, container_name, self.stdout.clone());
        let mut err = LinePrefixWriter::new(job_name, container_name, self.stderr.clone());
        tokio::spawn(async move {
            while let Some(chunk) = attach_rx.recv().await {
                let writer = if tty || chunk.source == OutputSource::Stdout {
                    &mut out
                } else {
                    &mut err
                };
                let _ = writer.write_all(&chunk.bytes);
            }
            out.finish();
            err.finish();
        })
    }

    /// Force-remove every container in the plan that was actually created.
    pub(crate) async fn force_remove_containers(&self, container_ids: &[String]) {
        for id in container_ids.iter().filter(|id| !id.is_empty()) {
            if let Err(e) = self.runtime.container_remove(id, true).await {
                tracing::warn!(container = %id, "error removing container: {e}");
            }
        }
    }
}

fn spawn_timeout_guard(
    job_ctx: &CancellationToken,
    timeout_seconds: u64,
) -> Option<JoinHandle<()>> {
    if timeout_seconds == 0 {
        return None;
    }
    let token = job_ctx.clone();
    Some(tokio::spawn(async move {
        tokio::select! {
            () = tokio::time::sleep(Duration::from_secs(timeout_seconds)) => token.cancel(),
            () = token.cancelled() => {}
        }
    }))
}

async fn remove_scratch_dir(path: PathBuf) {
    let path_display = path.display().to_string();
    let removal = tokio::task::spawn_blocking(move || std::fs::remove_dir_all(&path)).await;
    match removal {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(path = %path_display, "error removing job scratch directory: {e}"),
        Err(e) => tracing::warn!(path = %path_display, "scratch removal task panicked: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_slice_is_sorted_key_value_pairs() {
        let mut env = BTreeMap::new();
        env.insert("ZED".to_string(), "last".to_string());
        env.insert("ALPHA".to_string(), "first".to_string());
        env.insert("MID".to_string(), "middle".to_string());
        assert_eq!(
            environment_map_to_slice(&env),
            vec!["ALPHA=first", "MID=middle", "ZED=last"]
        );
    }

    #[test]
    fn environment_slice_of_empty_map_is_empty() {
        assert!(environment_map_to_slice(&BTreeMap::new()).is_empty());
    }
}
