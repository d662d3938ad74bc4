//! Configuration loading and resolution for drydock jobs and pipelines.
//!
//! A configuration document (YAML or JSON) is normalized to JSON, validated
//! against a fixed schema, and resolved into an immutable [`Config`] graph of
//! jobs and pipelines. Resolution enforces the cross-reference invariants that
//! make every pipeline a DAG: dependencies must name pipeline jobs that appear
//! earlier in the pipeline's declared order.

mod adhoc;
mod error;
mod flat;
mod loader;
mod model;
mod schema;

pub use error::ConfigError;
pub use model::{
    Config, Container, CpuResources, ImagePullPolicy, Job, MemoryResources, OsFamily, Pipeline,
    PipelineJob, Resources, SourceMountMode, Trigger,
};
pub use schema::{SPEC_URI, SUPPORTED_SPEC_VERSIONS};
