//! Loading configuration from real files.

use drydock_config::{Config, ConfigError, SourceMountMode};

const FIXTURE: &str = r#"
specUri: github.com/lovethedrake/drakespec
specVersion: v0.2.0

snippets:
  tools: &tools
    name: tools
    image: golang:1.22

jobs:
  lint:
    primaryContainer:
      <<: *tools
      command: ["make"]
      args: ["lint"]
      sourceMountPath: /workspaces/project
  test:
    sourceMountMode: COPY
    primaryContainer:
      <<: *tools
      args: ["test"]
      sourceMountPath: /workspaces/project
  publish:
    primaryContainer:
      <<: *tools
      args: ["publish"]
      environment:
        REGISTRY: registry.example.com

pipelines:
  ci:
    triggers:
      - specUri: example.com/triggers/git
        specVersion: v1.0.0
    jobs:
      - name: lint
      - name: test
      - name: publish
        dependencies: [lint, test]
"#;

#[test]
fn fixture_file_resolves_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Drakefile.yaml");
    std::fs::write(&path, FIXTURE).unwrap();

    let config = Config::from_file(&path).unwrap();

    let jobs = config.all_jobs();
    let names: Vec<&str> = jobs.iter().map(|job| job.name()).collect();
    assert_eq!(names, vec!["lint", "publish", "test"]);
    assert_eq!(
        config.jobs(&["test"]).unwrap()[0].source_mount_mode(),
        SourceMountMode::Copy
    );

    let pipeline = config.pipelines(&["ci"]).unwrap().remove(0);
    assert_eq!(pipeline.jobs().len(), 3);
    assert_eq!(pipeline.jobs()[2].dependencies(), &[0, 1]);
    assert_eq!(pipeline.triggers().len(), 1);

    // Anchor reuse from the snippets block applied to every job.
    for job in &jobs {
        assert_eq!(job.primary_container().image(), "golang:1.22");
    }
}

#[test]
fn missing_file_reports_the_path() {
    let err = Config::from_file(std::path::Path::new("/no/such/Drakefile.yaml")).unwrap_err();
    let ConfigError::Io { path, .. } = err else {
        panic!("expected Io error");
    };
    assert_eq!(path, std::path::Path::new("/no/such/Drakefile.yaml"));
}
