//! Configuration error model.

use std::path::PathBuf;

/// Errors produced while loading or resolving a configuration document.
///
/// Resolution is strict: the first invariant violation aborts construction.
/// Messages quote the offending job and pipeline names verbatim.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The document could not be read from disk.
    #[error("error reading config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document is not well-formed YAML/JSON.
    #[error("error parsing configuration document: {0}")]
    Syntax(#[from] serde_yaml::Error),

    /// The document parsed but could not be decoded into the expected shape.
    #[error("error decoding configuration document: {0}")]
    Decode(#[from] serde_json::Error),

    /// The document violates the configuration schema.
    #[error("configuration is invalid:\n- {}", .violations.join("\n- "))]
    SchemaViolation { violations: Vec<String> },

    /// The document declares a spec URI or version outside the accepted set.
    #[error("unsupported configuration spec: uri \"{uri}\", version \"{version}\"")]
    UnsupportedSpec { uri: String, version: String },

    /// A pipeline lists the same job twice.
    #[error("pipeline \"{pipeline}\" references the job \"{job}\" more than once")]
    DuplicateJobInPipeline { pipeline: String, job: String },

    /// A pipeline references a job that is not defined.
    #[error("pipeline \"{pipeline}\" references undefined job \"{job}\"")]
    UndefinedJob { pipeline: String, job: String },

    /// A pipeline job depends on a job that is not defined anywhere.
    #[error("job \"{job}\" of pipeline \"{pipeline}\" depends on undefined job \"{dependency}\"")]
    UndefinedDependency {
        pipeline: String,
        job: String,
        dependency: String,
    },

    /// A pipeline job depends on a defined job that does not precede it.
    #[error(
        "job \"{job}\" of pipeline \"{pipeline}\" depends on job \"{dependency}\", which is \
         defined, but does not precede \"{job}\" in this pipeline"
    )]
    DoesNotPrecede {
        pipeline: String,
        job: String,
        dependency: String,
    },

    /// A pipeline references a job whose source mount mode is READ_WRITE.
    #[error("pipeline \"{pipeline}\" illegally references job \"{job}\" with sourceMountMode READ_WRITE")]
    IllegalReadWriteInPipeline { pipeline: String, job: String },

    /// A job lookup by name failed.
    #[error("job \"{0}\" not found")]
    UnknownJob(String),

    /// A pipeline lookup by name failed.
    #[error("pipeline \"{0}\" not found")]
    UnknownPipeline(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn does_not_precede_message_quotes_all_names() {
        let err = ConfigError::DoesNotPrecede {
            pipeline: "p".to_string(),
            job: "b".to_string(),
            dependency: "a".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("job \"b\""));
        assert!(msg.contains("depends on job \"a\""));
        assert!(msg.contains("does not precede \"b\""));
    }

    #[test]
    fn schema_violation_lists_every_entry() {
        let err = ConfigError::SchemaViolation {
            violations: vec!["/jobs/x: oops".to_string(), "/specUri: bad".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("- /jobs/x: oops"));
        assert!(msg.contains("- /specUri: bad"));
    }
}
