//! The resolved configuration object graph.
//!
//! Everything here is immutable once built by the loader. Accessors that
//! return aggregate collections return copies so callers can never disturb
//! the graph itself.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::ConfigError;

/// How host source is exposed to a job's containers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum SourceMountMode {
    /// Bind mount, read-only.
    #[default]
    #[serde(rename = "READ_ONLY")]
    ReadOnly,
    /// A per-execution writable copy of the source tree.
    #[serde(rename = "COPY")]
    Copy,
    /// Bind mount, read-write. Only legal for jobs run stand-alone.
    #[serde(rename = "READ_WRITE")]
    ReadWrite,
}

/// Operating system family a job's containers target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum OsFamily {
    #[default]
    #[serde(rename = "linux")]
    Linux,
    #[serde(rename = "windows")]
    Windows,
}

/// Whether an image should be re-pulled when it is already present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum ImagePullPolicy {
    #[default]
    IfNotPresent,
    Always,
}

/// CPU resource bounds, in millicores.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CpuResources {
    pub requested_millicores: u64,
    pub max_millicores: u64,
}

impl Default for CpuResources {
    fn default() -> Self {
        Self {
            requested_millicores: 100,
            max_millicores: 200,
        }
    }
}

/// Memory resource bounds, in megabytes.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MemoryResources {
    pub requested_megabytes: u64,
    pub max_megabytes: u64,
}

impl Default for MemoryResources {
    fn default() -> Self {
        Self {
            requested_megabytes: 128,
            max_megabytes: 256,
        }
    }
}

/// Resource bounds for one container.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct Resources {
    pub cpu: CpuResources,
    pub memory: MemoryResources,
}

/// One container within a job.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    name: String,
    image: String,
    #[serde(default)]
    image_pull_policy: ImagePullPolicy,
    #[serde(default)]
    environment: BTreeMap<String, String>,
    #[serde(default)]
    working_directory: Option<String>,
    #[serde(default)]
    command: Vec<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    tty: bool,
    #[serde(default)]
    privileged: bool,
    #[serde(default)]
    mount_docker_socket: bool,
    #[serde(default)]
    source_mount_path: Option<String>,
    #[serde(default)]
    shared_storage_mount_path: Option<String>,
    #[serde(default)]
    resources: Resources,
}

impl Container {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registry reference for the container's image.
    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn image_pull_policy(&self) -> ImagePullPolicy {
        self.image_pull_policy
    }

    /// Container-specific environment variables, keyed by name.
    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    pub fn working_directory(&self) -> Option<&str> {
        self.working_directory.as_deref()
    }

    /// Entrypoint override, empty when the image default applies.
    pub fn command(&self) -> &[String] {
        &self.command
    }

    /// Cmd override, empty when the image default applies.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn tty(&self) -> bool {
        self.tty
    }

    pub fn privileged(&self) -> bool {
        self.privileged
    }

    pub fn mount_docker_socket(&self) -> bool {
        self.mount_docker_socket
    }

    pub fn source_mount_path(&self) -> Option<&str> {
        self.source_mount_path.as_deref()
    }

    pub fn shared_storage_mount_path(&self) -> Option<&str> {
        self.shared_storage_mount_path.as_deref()
    }

    pub fn resources(&self) -> Resources {
        self.resources
    }
}

/// A named unit of execution: one primary container plus optional sidecars.
#[derive(Debug, Clone)]
pub struct Job {
    name: String,
    primary_container: Container,
    sidecar_containers: Vec<Container>,
    source_mount_mode: SourceMountMode,
    os_family: OsFamily,
    cpu_arch: String,
    timeout_seconds: u64,
}

impl Job {
    pub(crate) fn new(name: String, flat: crate::flat::FlatJob) -> Self {
        Self {
            name,
            primary_container: flat.primary_container,
            sidecar_containers: flat.sidecar_containers,
            source_mount_mode: flat.source_mount_mode,
            os_family: flat.os_family,
            cpu_arch: flat.cpu_arch,
            timeout_seconds: flat.timeout_seconds,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary_container(&self) -> &Container {
        &self.primary_container
    }

    /// Sidecars in declared (start) order.
    pub fn sidecar_containers(&self) -> &[Container] {
        &self.sidecar_containers
    }

    /// All containers in creation order: sidecars first, the primary last.
    pub fn containers(&self) -> impl Iterator<Item = &Container> {
        self.sidecar_containers
            .iter()
            .chain(std::iter::once(&self.primary_container))
    }

    pub fn source_mount_mode(&self) -> SourceMountMode {
        self.source_mount_mode
    }

    pub fn os_family(&self) -> OsFamily {
        self.os_family
    }

    pub fn cpu_arch(&self) -> &str {
        &self.cpu_arch
    }

    /// Per-job execution timeout. Zero means no timeout.
    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds
    }
}

/// An opaque pipeline trigger. The engine never interprets these.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    spec_uri: String,
    spec_version: String,
    #[serde(default)]
    config: serde_json::Value,
}

impl Trigger {
    pub fn spec_uri(&self) -> &str {
        &self.spec_uri
    }

    pub fn spec_version(&self) -> &str {
        &self.spec_version
    }

    pub fn config(&self) -> &serde_json::Value {
        &self.config
    }
}

/// One node of a pipeline: a resolved job plus its in-pipeline dependencies.
///
/// Dependencies are indices into the owning pipeline's job list and always
/// point at earlier entries, which is what makes the declared order a
/// topological sort.
#[derive(Debug, Clone)]
pub struct PipelineJob {
    job: Arc<Job>,
    dependencies: Vec<usize>,
}

impl PipelineJob {
    pub(crate) fn new(job: Arc<Job>, dependencies: Vec<usize>) -> Self {
        Self { job, dependencies }
    }

    pub fn job(&self) -> &Arc<Job> {
        &self.job
    }

    pub fn dependencies(&self) -> &[usize] {
        &self.dependencies
    }
}

/// A named DAG of pipeline jobs.
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    triggers: Vec<Trigger>,
    jobs: Vec<PipelineJob>,
}

impl Pipeline {
    pub(crate) fn new(name: String, triggers: Vec<Trigger>, jobs: Vec<PipelineJob>) -> Self {
        Self {
            name,
            triggers,
            jobs,
        }
    }

    /// The pipeline's name. Empty for the synthetic ad-hoc pipeline.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }

    /// Pipeline jobs in declared (topological) order.
    pub fn jobs(&self) -> &[PipelineJob] {
        &self.jobs
    }
}

/// The root of the resolved configuration tree.
#[derive(Debug)]
pub struct Config {
    pub(crate) jobs: Vec<Arc<Job>>,
    pub(crate) jobs_by_name: BTreeMap<String, Arc<Job>>,
    pub(crate) pipelines: Vec<Arc<Pipeline>>,
    pub(crate) pipelines_by_name: BTreeMap<String, Arc<Pipeline>>,
}

impl Config {
    /// All jobs, lexically ordered by name. Returns a copy.
    pub fn all_jobs(&self) -> Vec<Arc<Job>> {
        self.jobs.clone()
    }

    /// The named jobs, in the order requested.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownJob`] for the first name that does not
    /// resolve.
    pub fn jobs<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<Arc<Job>>, ConfigError> {
        names
            .iter()
            .map(|name| {
                self.jobs_by_name
                    .get(name.as_ref())
                    .cloned()
                    .ok_or_else(|| ConfigError::UnknownJob(name.as_ref().to_string()))
            })
            .collect()
    }

    /// All pipelines, lexically ordered by name. Returns a copy.
    pub fn all_pipelines(&self) -> Vec<Arc<Pipeline>> {
        self.pipelines.clone()
    }

    /// The named pipelines, in the order requested.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownPipeline`] for the first name that does
    /// not resolve.
    pub fn pipelines<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<Arc<Pipeline>>, ConfigError> {
        names
            .iter()
            .map(|name| {
                self.pipelines_by_name
                    .get(name.as_ref())
                    .cloned()
                    .ok_or_else(|| ConfigError::UnknownPipeline(name.as_ref().to_string()))
            })
            .collect()
    }
}
