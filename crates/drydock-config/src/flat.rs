//! Flat serde form of the configuration document.
//!
//! The document deserializes into these one-off types first; the loader then
//! rewires them into the resolved graph in [`crate::model`].

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::model::{Container, OsFamily, SourceMountMode, Trigger};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FlatConfig {
    pub spec_uri: String,
    pub spec_version: String,
    #[serde(default)]
    pub jobs: BTreeMap<String, FlatJob>,
    #[serde(default)]
    pub pipelines: BTreeMap<String, FlatPipeline>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FlatJob {
    pub primary_container: Container,
    #[serde(default)]
    pub sidecar_containers: Vec<Container>,
    #[serde(default)]
    pub source_mount_mode: SourceMountMode,
    #[serde(default)]
    pub os_family: OsFamily,
    #[serde(default = "default_cpu_arch")]
    pub cpu_arch: String,
    #[serde(default)]
    pub timeout_seconds: u64,
}

fn default_cpu_arch() -> String {
    "amd64".to_string()
}

#[derive(Debug, Deserialize)]
pub(crate) struct FlatPipeline {
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    #[serde(default)]
    pub jobs: Vec<FlatPipelineJob>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FlatPipelineJob {
    pub name: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
}
