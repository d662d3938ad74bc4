//! The configuration document schema.

use std::sync::LazyLock;

use crate::error::ConfigError;

/// The spec URI this engine accepts.
pub const SPEC_URI: &str = "github.com/lovethedrake/drakespec";

/// The spec versions this engine accepts.
pub const SUPPORTED_SPEC_VERSIONS: &[&str] = &["v0.2.0"];

const SCHEMA: &str = r##"{
  "$schema": "http://json-schema.org/draft-07/schema#",
  "title": "drydock configuration",
  "type": "object",
  "required": ["specUri", "specVersion"],
  "additionalProperties": false,
  "properties": {
    "specUri": {
      "type": "string",
      "enum": ["github.com/lovethedrake/drakespec"]
    },
    "specVersion": {
      "type": "string",
      "enum": ["v0.2.0"]
    },
    "snippets": {
      "type": "object"
    },
    "jobs": {
      "type": "object",
      "additionalProperties": false,
      "patternProperties": {
        "^\\w[\\w-]*$": { "$ref": "#/definitions/job" }
      }
    },
    "pipelines": {
      "type": "object",
      "additionalProperties": false,
      "patternProperties": {
        "^\\w[\\w-]*$": { "$ref": "#/definitions/pipeline" }
      }
    }
  },
  "definitions": {
    "identifier": {
      "type": "string",
      "pattern": "^\\w[\\w-]*$"
    },
    "job": {
      "type": "object",
      "required": ["primaryContainer"],
      "additionalProperties": false,
      "properties": {
        "primaryContainer": { "$ref": "#/definitions/container" },
        "sidecarContainers": {
          "type": "array",
          "items": { "$ref": "#/definitions/container" }
        },
        "sourceMountMode": {
          "type": "string",
          "enum": ["READ_ONLY", "COPY", "READ_WRITE"]
        },
        "osFamily": {
          "type": "string",
          "enum": ["linux", "windows"]
        },
        "cpuArch": { "type": "string", "minLength": 1 },
        "timeoutSeconds": { "type": "integer", "minimum": 0 }
      }
    },
    "container": {
      "type": "object",
      "required": ["name", "image"],
      "additionalProperties": false,
      "properties": {
        "name": { "$ref": "#/definitions/identifier" },
        "image": { "type": "string", "minLength": 1 },
        "imagePullPolicy": {
          "type": "string",
          "enum": ["IfNotPresent", "Always"]
        },
        "environment": {
          "type": "object",
          "additionalProperties": { "type": "string" }
        },
        "workingDirectory": { "type": "string" },
        "command": {
          "type": "array",
          "items": { "type": "string" }
        },
        "args": {
          "type": "array",
          "items": { "type": "string" }
        },
        "tty": { "type": "boolean" },
        "privileged": { "type": "boolean" },
        "mountDockerSocket": { "type": "boolean" },
        "sourceMountPath": { "type": "string" },
        "sharedStorageMountPath": { "type": "string" },
        "resources": { "$ref": "#/definitions/resources" }
      }
    },
    "resources": {
      "type": "object",
      "additionalProperties": false,
      "properties": {
        "cpu": {
          "type": "object",
          "additionalProperties": false,
          "properties": {
            "requestedMillicores": {
              "type": "integer",
              "minimum": 0,
              "maximum": 1024000
            },
            "maxMillicores": {
              "type": "integer",
              "minimum": 0,
              "maximum": 1024000
            }
          }
        },
        "memory": {
          "type": "object",
          "additionalProperties": false,
          "properties": {
            "requestedMegabytes": {
              "type": "integer",
              "minimum": 0,
              "maximum": 1048576
            },
            "maxMegabytes": {
              "type": "integer",
              "minimum": 0,
              "maximum": 1048576
            }
          }
        }
      }
    },
    "pipeline": {
      "type": "object",
      "additionalProperties": false,
      "properties": {
        "triggers": {
          "type": "array",
          "items": { "$ref": "#/definitions/trigger" }
        },
        "jobs": {
          "type": "array",
          "items": { "$ref": "#/definitions/pipelineJob" }
        }
      }
    },
    "trigger": {
      "type": "object",
      "required": ["specUri", "specVersion"],
      "additionalProperties": false,
      "properties": {
        "specUri": { "type": "string", "minLength": 1 },
        "specVersion": { "type": "string", "minLength": 1 },
        "config": { "type": "object" }
      }
    },
    "pipelineJob": {
      "type": "object",
      "required": ["name"],
      "additionalProperties": false,
      "properties": {
        "name": { "$ref": "#/definitions/identifier" },
        "dependencies": {
          "type": "array",
          "items": { "$ref": "#/definitions/identifier" }
        }
      }
    }
  }
}"##;

static VALIDATOR: LazyLock<jsonschema::Validator> = LazyLock::new(|| {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA).expect("embedded schema is valid JSON");
    jsonschema::validator_for(&schema).expect("embedded schema compiles")
});

/// Validate a normalized configuration document against the schema.
///
/// # Errors
///
/// Returns [`ConfigError::SchemaViolation`] listing every failing instance
/// path.
pub(crate) fn validate(document: &serde_json::Value) -> Result<(), ConfigError> {
    let violations: Vec<String> = VALIDATOR
        .iter_errors(document)
        .map(|err| format!("{}: {}", err.instance_path, err))
        .collect();

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::SchemaViolation { violations })
    }
}
