//! Secrets file loading with environment-variable interpolation.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{(\w+)\}").expect("valid env var regex"));

/// Load a NAME→VALUE secrets mapping from a YAML or JSON file. A missing
/// file yields an empty mapping. `${VAR}` references in values are resolved
/// against the process environment; unset variables expand to empty.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn from_file(path: &Path) -> Result<BTreeMap<String, String>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("error reading secrets file {}", path.display()))?;
    let mut secrets: BTreeMap<String, String> = serde_yaml::from_str(&text)
        .with_context(|| format!("error parsing secrets file {}", path.display()))?;
    for value in secrets.values_mut() {
        *value = resolve_env_vars(value);
    }
    Ok(secrets)
}

/// Iteratively substitute `${VAR}` references. Each pass replaces the first
/// remaining reference and rescans, so one variable may be referenced many
/// times.
fn resolve_env_vars(value: &str) -> String {
    let mut resolved = value.to_string();
    loop {
        let Some(found) = ENV_VAR_RE.captures(&resolved) else {
            break;
        };
        let pattern = found[0].to_string();
        let var_name = found[1].to_string();
        let replacement = std::env::var(&var_name).unwrap_or_default();
        resolved = resolved.replacen(&pattern, &replacement, 1);
    }
    resolved
}
