//! The pipeline scheduler/executor.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use drydock_config::{ImagePullPolicy, Pipeline};
use drydock_runtime::ContainerRuntime;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::errors::ExecutionError;
use crate::moniker;
use crate::prefix::{shared_writer, SharedWriter};

/// Executes pipelines against a container runtime.
///
/// Cheap to clone; clones share the runtime handle and output sinks.
#[derive(Clone)]
pub struct Executor {
    pub(crate) runtime: Arc<dyn ContainerRuntime>,
    pub(crate) source_path: PathBuf,
    pub(crate) debug_only: bool,
    pub(crate) stdout: SharedWriter,
    pub(crate) stderr: SharedWriter,
}

impl Executor {
    /// A new executor writing container output to the process's own
    /// stdout/stderr.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, source_path: impl Into<PathBuf>) -> Self {
        Self {
            runtime,
            source_path: source_path.into(),
            debug_only: false,
            stdout: shared_writer(std::io::stdout()),
            stderr: shared_writer(std::io::stderr()),
        }
    }

    /// In debug-only mode `execute_pipeline` just lists what it would run.
    #[must_use]
    pub fn debug_only(mut self, debug_only: bool) -> Self {
        self.debug_only = debug_only;
        self
    }

    /// Redirect container output and progress banners, e.g. into capture
    /// buffers under test.
    #[must_use]
    pub fn with_output(mut self, stdout: SharedWriter, stderr: SharedWriter) -> Self {
        self.stdout = stdout;
        self.stderr = stderr;
        self
    }

    pub(crate) fn print(&self, line: impl AsRef<str>) {
        if let Ok(mut sink) = self.stdout.lock() {
            let _ = writeln!(sink, "{}", line.as_ref());
        }
    }

    /// Run one pipeline with at most `max_concurrency` jobs in flight.
    ///
    /// A job failure stops further jobs from *starting* but lets in-flight
    /// jobs run to completion; cancelling `ctx` aborts everything. Containers
    /// and the shared-storage volume are removed on every exit path.
    ///
    /// # Errors
    ///
    /// The sole per-job error when one job fails; a [`MultiError`] when two or
    /// more fail independently.
    ///
    /// [`MultiError`]: crate::errors::MultiError
    pub async fn execute_pipeline(
        &self,
        ctx: &CancellationToken,
        pipeline: &Arc<Pipeline>,
        secrets: &BTreeMap<String, String>,
        max_concurrency: usize,
    ) -> Result<(), ExecutionError> {
        let max_concurrency = max_concurrency.max(1);

        if self.debug_only {
            let names: Vec<&str> = pipeline.jobs().iter().map(|pj| pj.job().name()).collect();
            self.print(format!("would execute jobs: {names:?}"));
            return Ok(());
        }

        self.pull_images(ctx, pipeline).await?;

        let execution_name = if pipeline.name().is_empty() {
            moniker::name()
        } else {
            format!("{}-{}", moniker::name(), pipeline.name())
        };

        let needs_shared_storage = pipeline.jobs().iter().any(|pj| {
            pj.job()
                .containers()
                .any(|container| container.shared_storage_mount_path().is_some())
        });
        let shared_volume = if needs_shared_storage {
            let name = format!("{execution_name}-shared-storage");
            self.runtime.volume_create(&name).await.map_err(|e| {
                ExecutionError::infrastructure(
                    e,
                    format!(
                        "error creating shared storage volume for pipeline \"{}\"",
                        pipeline.name()
                    ),
                )
            })?;
            Some(name)
        } else {
            None
        };

        if pipeline.name().is_empty() {
            self.print("====> executing ad hoc pipeline <====");
        } else {
            self.print(format!("====> executing pipeline \"{}\" <====", pipeline.name()));
        }

        let result = self
            .run_schedule(
                ctx,
                pipeline,
                secrets,
                &execution_name,
                shared_volume.as_deref(),
                max_concurrency,
            )
            .await;

        if let Some(volume) = shared_volume {
            if let Err(e) = self.runtime.volume_remove(&volume, true).await {
                tracing::warn!(volume = %volume, "error removing volume: {e}");
            }
        }
        result
    }

    /// Pull every distinct image the pipeline needs. An image already present
    /// is skipped unless some container demands `Always`.
    async fn pull_images(
        &self,
        ctx: &CancellationToken,
        pipeline: &Pipeline,
    ) -> Result<(), ExecutionError> {
        let mut images: BTreeMap<String, ImagePullPolicy> = BTreeMap::new();
        for pipeline_job in pipeline.jobs() {
            for container in pipeline_job.job().containers() {
                let policy = images
                    .entry(container.image().to_string())
                    .or_insert_with(|| container.image_pull_policy());
                if container.image_pull_policy() == ImagePullPolicy::Always {
                    *policy = ImagePullPolicy::Always;
                }
            }
        }

        for (image, policy) in images {
            let present = self.runtime.image_present(&image).await.map_err(|e| {
                ExecutionError::infrastructure(e, format!("error inspecting image \"{image}\""))
            })?;
            if present && policy == ImagePullPolicy::IfNotPresent {
                tracing::debug!(image = %image, "image already present, not pulling");
                continue;
            }
            self.print(format!("~~~~> pulling image \"{image}\" <~~~~"));
            let mut progress = self.runtime.image_pull(&image).await;
            loop {
                tokio::select! {
                    item = progress.recv() => match item {
                        Some(Ok(message)) => self.print(message.status),
                        Some(Err(source)) => {
                            return Err(ExecutionError::ImagePullFailed { image, source });
                        }
                        None => break,
                    },
                    () = ctx.cancelled() => {
                        return Err(ExecutionError::Infrastructure(anyhow!(
                            "pull of image \"{image}\" canceled"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    async fn run_schedule(
        &self,
        ctx: &CancellationToken,
        pipeline: &Arc<Pipeline>,
        secrets: &BTreeMap<String, String>,
        execution_name: &str,
        shared_volume: Option<&str>,
        max_concurrency: usize,
    ) -> Result<(), ExecutionError> {
        let job_count = pipeline.jobs().len();

        // One completion latch per pipeline job, flipped exactly once by the
        // worker that ran the job to success. Schedulers subscribe to their
        // dependencies' latches.
        let mut done_txs = Vec::with_capacity(job_count);
        let mut done_rxs = Vec::with_capacity(job_count);
        for _ in 0..job_count {
            let (tx, rx) = watch::channel(false);
            done_txs.push(tx);
            done_rxs.push(rx);
        }
        let done_txs = Arc::new(done_txs);

        // Jobs land here when they are 100% ready to execute.
        let (jobs_tx, jobs_rx) = async_channel::bounded::<usize>(1);

        // Error reports from schedulers and workers. Unbounded so a send can
        // never block or be lost to cancellation.
        let (err_tx, mut err_rx) = mpsc::unbounded_channel::<ExecutionError>();

        // Cancelled on the first observed error: stops pending jobs from
        // starting without touching those already running.
        let pending = ctx.child_token();

        let mut tasks: JoinSet<()> = JoinSet::new();

        // One scheduler task per job: wait out its dependencies, then hand it
        // to a worker, racing both cancellation scopes throughout.
        for index in 0..job_count {
            let dependency_latches: Vec<watch::Receiver<bool>> = pipeline.jobs()[index]
                .dependencies()
                .iter()
                .map(|&dep| done_rxs[dep].clone())
                .collect();
            let pipeline = Arc::clone(pipeline);
            let jobs_tx = jobs_tx.clone();
            let err_tx = err_tx.clone();
            let pending = pending.clone();
            let ctx = ctx.clone();
            tasks.spawn(async move {
                let job_name = pipeline.jobs()[index].job().name().to_string();
                for mut latch in dependency_latches {
                    tokio::select! {
                        done = latch.wait_for(|done| *done) => {
                            if done.is_err() {
                                let _ = err_tx.send(ExecutionError::PendingJobCanceled {
                                    job: job_name.clone(),
                                });
                                return;
                            }
                        }
                        () = pending.cancelled() => {
                            let _ = err_tx.send(ExecutionError::PendingJobCanceled {
                                job: job_name.clone(),
                            });
                            return;
                        }
                        () = ctx.cancelled() => {
                            let _ = err_tx.send(ExecutionError::PendingJobCanceled {
                                job: job_name.clone(),
                            });
                            return;
                        }
                    }
                }
                tokio::select! {
                    sent = jobs_tx.send(index) => {
                        if sent.is_err() {
                            let _ = err_tx.send(ExecutionError::PendingJobCanceled {
                                job: job_name.clone(),
                            });
                        }
                    }
                    () = pending.cancelled() => {
                        let _ = err_tx.send(ExecutionError::PendingJobCanceled {
                            job: job_name.clone(),
                        });
                    }
                    () = ctx.cancelled() => {
                        let _ = err_tx.send(ExecutionError::PendingJobCanceled {
                            job: job_name.clone(),
                        });
                    }
                }
            });
        }
        // Schedulers hold the only senders; the queue closes when the last
        // one finishes, which is what lets idle workers exit.
        drop(jobs_tx);

        // The worker pool.
        for _ in 0..max_concurrency {
            let executor = self.clone();
            let pipeline = Arc::clone(pipeline);
            let jobs_rx = jobs_rx.clone();
            let err_tx = err_tx.clone();
            let done_txs = Arc::clone(&done_txs);
            let pending = pending.clone();
            let ctx = ctx.clone();
            let secrets = secrets.clone();
            let execution_name = execution_name.to_string();
            let shared_volume = shared_volume.map(str::to_string);
            tasks.spawn(async move {
                loop {
                    tokio::select! {
                        received = jobs_rx.recv() => {
                            let Ok(index) = received else {
                                return;
                            };
                            let job = pipeline.jobs()[index].job();
                            let job_execution_name =
                                format!("{execution_name}-{}", job.name());
                            match executor
                                .execute_job(
                                    &ctx,
                                    &secrets,
                                    &job_execution_name,
                                    shared_volume.as_deref(),
                                    job,
                                )
                                .await
                            {
                                Ok(()) => {
                                    // Unblock everything waiting on this job.
                                    let _ = done_txs[index].send(true);
                                }
                                Err(err) => {
                                    // Not raced against cancellation; a
                                    // terminal error must never be lost.
                                    let _ = err_tx.send(err);
                                }
                            }
                        }
                        () = pending.cancelled() => return,
                        () = ctx.cancelled() => return,
                    }
                }
            });
        }
        drop(err_tx);

        // Collect errors until every scheduler and worker has exited, then
        // drain whatever is still queued.
        let mut errors: Vec<ExecutionError> = Vec::new();
        loop {
            tokio::select! {
                Some(err) = err_rx.recv() => {
                    tracing::debug!("pipeline error observed: {err}");
                    errors.push(err);
                    pending.cancel();
                }
                joined = tasks.join_next() => match joined {
                    Some(Ok(())) => {}
                    Some(Err(join_err)) => {
                        errors.push(ExecutionError::Infrastructure(anyhow!(
                            "pipeline task panicked: {join_err}"
                        )));
                        pending.cancel();
                    }
                    None => break,
                },
            }
        }
        while let Ok(err) = err_rx.try_recv() {
            errors.push(err);
        }

        ExecutionError::aggregate(errors)
    }
}
