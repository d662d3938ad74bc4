//! Document loading and the two-pass resolver.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::ConfigError;
use crate::flat::{FlatConfig, FlatPipeline};
use crate::model::{Config, Job, Pipeline, PipelineJob, SourceMountMode};
use crate::schema::{self, SPEC_URI, SUPPORTED_SPEC_VERSIONS};

impl Config {
    /// Load and resolve configuration from a file.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read, fails schema
    /// validation, or violates a resolution invariant.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    /// Load and resolve configuration from YAML or JSON text.
    ///
    /// YAML merge keys (the usual `snippets` anchor-reuse pattern) are
    /// resolved before schema validation.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the document is malformed, fails schema
    /// validation, or violates a resolution invariant.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let mut yaml: serde_yaml::Value = serde_yaml::from_str(text)?;
        yaml.apply_merge()?;
        let document = serde_json::to_value(&yaml)?;
        schema::validate(&document)?;
        let flat: FlatConfig = serde_json::from_value(document)?;
        resolve(flat)
    }
}

fn resolve(flat: FlatConfig) -> Result<Config, ConfigError> {
    if flat.spec_uri != SPEC_URI || !SUPPORTED_SPEC_VERSIONS.contains(&flat.spec_version.as_str())
    {
        return Err(ConfigError::UnsupportedSpec {
            uri: flat.spec_uri,
            version: flat.spec_version,
        });
    }

    // Pass 1: jobs. The map key is the job's name.
    let mut jobs = Vec::with_capacity(flat.jobs.len());
    let mut jobs_by_name = BTreeMap::new();
    for (name, flat_job) in flat.jobs {
        let job = Arc::new(Job::new(name.clone(), flat_job));
        jobs.push(Arc::clone(&job));
        jobs_by_name.insert(name, job);
    }
    jobs.sort_by(|a, b| a.name().cmp(b.name()));

    // Pass 2: pipelines, resolving job references and dependency order.
    let mut pipelines = Vec::with_capacity(flat.pipelines.len());
    let mut pipelines_by_name = BTreeMap::new();
    for (name, flat_pipeline) in flat.pipelines {
        let pipeline = Arc::new(resolve_pipeline(&name, flat_pipeline, &jobs_by_name)?);
        pipelines.push(Arc::clone(&pipeline));
        pipelines_by_name.insert(name, pipeline);
    }
    pipelines.sort_by(|a, b| a.name().cmp(b.name()));

    Ok(Config {
        jobs,
        jobs_by_name,
        pipelines,
        pipelines_by_name,
    })
}

fn resolve_pipeline(
    name: &str,
    flat: FlatPipeline,
    jobs_by_name: &BTreeMap<String, Arc<Job>>,
) -> Result<Pipeline, ConfigError> {
    // Pipeline jobs already resolved for this pipeline, by name. Dependencies
    // must resolve against this map, which is what forbids self-dependencies,
    // forward references, and cycles all at once.
    let mut seen: BTreeMap<String, usize> = BTreeMap::new();
    let mut pipeline_jobs = Vec::with_capacity(flat.jobs.len());

    for flat_pipeline_job in flat.jobs {
        if seen.contains_key(&flat_pipeline_job.name) {
            return Err(ConfigError::DuplicateJobInPipeline {
                pipeline: name.to_string(),
                job: flat_pipeline_job.name,
            });
        }
        let Some(job) = jobs_by_name.get(&flat_pipeline_job.name) else {
            return Err(ConfigError::UndefinedJob {
                pipeline: name.to_string(),
                job: flat_pipeline_job.name,
            });
        };
        if job.source_mount_mode() == SourceMountMode::ReadWrite {
            return Err(ConfigError::IllegalReadWriteInPipeline {
                pipeline: name.to_string(),
                job: flat_pipeline_job.name,
            });
        }

        let mut dependencies = Vec::with_capacity(flat_pipeline_job.dependencies.len());
        for dependency in &flat_pipeline_job.dependencies {
            match seen.get(dependency) {
                Some(&index) => dependencies.push(index),
                None if jobs_by_name.contains_key(dependency) => {
                    return Err(ConfigError::DoesNotPrecede {
                        pipeline: name.to_string(),
                        job: flat_pipeline_job.name,
                        dependency: dependency.clone(),
                    });
                }
                None => {
                    return Err(ConfigError::UndefinedDependency {
                        pipeline: name.to_string(),
                        job: flat_pipeline_job.name,
                        dependency: dependency.clone(),
                    });
                }
            }
        }

        seen.insert(flat_pipeline_job.name, pipeline_jobs.len());
        pipeline_jobs.push(PipelineJob::new(Arc::clone(job), dependencies));
    }

    Ok(Pipeline::new(
        name.to_string(),
        flat.triggers,
        pipeline_jobs,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ImagePullPolicy;

    fn config(yaml: &str) -> Config {
        Config::from_yaml(yaml).expect("configuration should resolve")
    }

    fn config_err(yaml: &str) -> ConfigError {
        Config::from_yaml(yaml).expect_err("configuration should be rejected")
    }

    const PREAMBLE: &str = "specUri: github.com/lovethedrake/drakespec\nspecVersion: v0.2.0\n";

    fn with_preamble(body: &str) -> String {
        format!("{PREAMBLE}{body}")
    }

    #[test]
    fn jobs_and_pipelines_are_lexically_ordered() {
        let cfg = config(&with_preamble(
            r#"
jobs:
  zeta:
    primaryContainer:
      name: main
      image: alpine
  alpha:
    primaryContainer:
      name: main
      image: alpine
  mid:
    primaryContainer:
      name: main
      image: alpine
pipelines:
  second:
    jobs:
      - name: alpha
  first:
    jobs:
      - name: zeta
"#,
        ));
        let jobs = cfg.all_jobs();
        let job_names: Vec<&str> = jobs.iter().map(|j| j.name()).collect();
        assert_eq!(job_names, vec!["alpha", "mid", "zeta"]);
        let pipeline_names: Vec<String> = cfg
            .all_pipelines()
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        assert_eq!(pipeline_names, vec!["first", "second"]);
    }

    #[test]
    fn returned_collections_are_defensive_copies() {
        let cfg = config(&with_preamble(
            r#"
jobs:
  only:
    primaryContainer:
      name: main
      image: alpine
"#,
        ));
        let mut jobs = cfg.all_jobs();
        jobs.clear();
        assert_eq!(cfg.all_jobs().len(), 1);

        let mut pipelines = cfg.all_pipelines();
        pipelines.push(Arc::new(Pipeline::new(String::new(), vec![], vec![])));
        assert!(cfg.all_pipelines().is_empty());
    }

    #[test]
    fn lookup_by_name_preserves_request_order() {
        let cfg = config(&with_preamble(
            r#"
jobs:
  a:
    primaryContainer:
      name: main
      image: alpine
  b:
    primaryContainer:
      name: main
      image: alpine
"#,
        ));
        let jobs = cfg.jobs(&["b", "a"]).unwrap();
        assert_eq!(jobs[0].name(), "b");
        assert_eq!(jobs[1].name(), "a");
    }

    #[test]
    fn unknown_job_lookup_quotes_the_name() {
        let cfg = config(&with_preamble(
            r#"
jobs:
  a:
    primaryContainer:
      name: main
      image: alpine
"#,
        ));
        let err = cfg.jobs(&["nope"]).unwrap_err();
        assert_eq!(err.to_string(), "job \"nope\" not found");
    }

    #[test]
    fn dependencies_resolve_to_preceding_entries() {
        let cfg = config(&with_preamble(
            r#"
jobs:
  a:
    primaryContainer:
      name: main
      image: alpine
  b:
    primaryContainer:
      name: main
      image: alpine
  c:
    primaryContainer:
      name: main
      image: alpine
pipelines:
  p:
    jobs:
      - name: a
      - name: b
        dependencies: [a]
      - name: c
        dependencies: [a, b]
"#,
        ));
        let pipeline = &cfg.all_pipelines()[0];
        let jobs = pipeline.jobs();
        assert!(jobs[0].dependencies().is_empty());
        assert_eq!(jobs[1].dependencies(), &[0]);
        assert_eq!(jobs[2].dependencies(), &[0, 1]);
        assert_eq!(jobs[2].job().name(), "c");
    }

    #[test]
    fn forward_dependency_is_rejected() {
        let err = config_err(&with_preamble(
            r#"
jobs:
  a:
    primaryContainer:
      name: main
      image: alpine
  b:
    primaryContainer:
      name: main
      image: alpine
pipelines:
  p:
    jobs:
      - name: b
        dependencies: [a]
      - name: a
"#,
        ));
        let msg = err.to_string();
        assert!(msg.contains("job \"b\""), "got: {msg}");
        assert!(msg.contains("depends on job \"a\""), "got: {msg}");
        assert!(msg.contains("does not precede"), "got: {msg}");
    }

    #[test]
    fn self_dependency_is_rejected_as_not_preceding() {
        let err = config_err(&with_preamble(
            r#"
jobs:
  a:
    primaryContainer:
      name: main
      image: alpine
pipelines:
  p:
    jobs:
      - name: a
        dependencies: [a]
"#,
        ));
        assert!(matches!(err, ConfigError::DoesNotPrecede { .. }));
    }

    #[test]
    fn undefined_dependency_is_rejected() {
        let err = config_err(&with_preamble(
            r#"
jobs:
  a:
    primaryContainer:
      name: main
      image: alpine
pipelines:
  p:
    jobs:
      - name: a
        dependencies: [ghost]
"#,
        ));
        assert!(matches!(err, ConfigError::UndefinedDependency { .. }));
        assert!(err.to_string().contains("undefined job \"ghost\""));
    }

    #[test]
    fn undefined_pipeline_job_is_rejected() {
        let err = config_err(&with_preamble(
            r#"
jobs:
  a:
    primaryContainer:
      name: main
      image: alpine
pipelines:
  p:
    jobs:
      - name: ghost
"#,
        ));
        assert_eq!(
            err.to_string(),
            "pipeline \"p\" references undefined job \"ghost\""
        );
    }

    #[test]
    fn duplicate_job_in_pipeline_is_rejected() {
        let err = config_err(&with_preamble(
            r#"
jobs:
  a:
    primaryContainer:
      name: main
      image: alpine
pipelines:
  p:
    jobs:
      - name: a
      - name: a
"#,
        ));
        assert_eq!(
            err.to_string(),
            "pipeline \"p\" references the job \"a\" more than once"
        );
    }

    #[test]
    fn read_write_job_in_pipeline_is_rejected() {
        let err = config_err(&with_preamble(
            r#"
jobs:
  a:
    sourceMountMode: READ_WRITE
    primaryContainer:
      name: main
      image: alpine
pipelines:
  p:
    jobs:
      - name: a
"#,
        ));
        assert!(matches!(err, ConfigError::IllegalReadWriteInPipeline { .. }));
    }

    #[test]
    fn read_write_job_is_fine_outside_pipelines() {
        let cfg = config(&with_preamble(
            r#"
jobs:
  a:
    sourceMountMode: READ_WRITE
    primaryContainer:
      name: main
      image: alpine
"#,
        ));
        assert_eq!(
            cfg.all_jobs()[0].source_mount_mode(),
            SourceMountMode::ReadWrite
        );
    }

    #[test]
    fn wrong_spec_uri_is_rejected() {
        let err = config_err(
            "specUri: example.com/other\nspecVersion: v0.2.0\njobs: {}\n",
        );
        // The schema rejects it before the resolver's own check runs.
        assert!(matches!(err, ConfigError::SchemaViolation { .. }));
    }

    #[test]
    fn yaml_anchor_reuse_via_snippets_resolves() {
        let cfg = config(&with_preamble(
            r#"
snippets:
  baseContainer: &baseContainer
    name: main
    image: alpine:3.20
    environment:
      CI: "true"
jobs:
  a:
    primaryContainer:
      <<: *baseContainer
  b:
    primaryContainer:
      <<: *baseContainer
      image: debian:12
"#,
        ));
        let jobs = cfg.all_jobs();
        assert_eq!(jobs[0].primary_container().image(), "alpine:3.20");
        assert_eq!(jobs[1].primary_container().image(), "debian:12");
        assert_eq!(
            jobs[1].primary_container().environment().get("CI"),
            Some(&"true".to_string())
        );
    }

    #[test]
    fn json_documents_load_too() {
        let cfg = config(
            r#"{
  "specUri": "github.com/lovethedrake/drakespec",
  "specVersion": "v0.2.0",
  "jobs": {
    "a": {
      "primaryContainer": {
        "name": "main",
        "image": "alpine",
        "imagePullPolicy": "Always"
      }
    }
  }
}"#,
        );
        assert_eq!(
            cfg.all_jobs()[0].primary_container().image_pull_policy(),
            ImagePullPolicy::Always
        );
    }

    #[test]
    fn triggers_are_carried_opaquely() {
        let cfg = config(&with_preamble(
            r#"
jobs:
  a:
    primaryContainer:
      name: main
      image: alpine
pipelines:
  p:
    triggers:
      - specUri: example.com/triggers/git
        specVersion: v1.0.0
        config:
          branch: main
    jobs:
      - name: a
"#,
        ));
        let pipeline = &cfg.all_pipelines()[0];
        assert_eq!(pipeline.triggers().len(), 1);
        assert_eq!(pipeline.triggers()[0].spec_uri(), "example.com/triggers/git");
        assert_eq!(pipeline.triggers()[0].config()["branch"], "main");
    }
}
