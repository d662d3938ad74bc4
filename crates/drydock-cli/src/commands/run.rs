use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use drydock_config::{Config, Pipeline};
use drydock_engine::Executor;
use drydock_runtime::docker::DockerRuntime;

use crate::secrets;
use crate::signals;

/// Execute the `run` command: resolve configuration and secrets, build the
/// executor, and run either the named pipeline or the named jobs wrapped in
/// an ad-hoc serial pipeline.
pub async fn execute(
    config_file: &Path,
    pipeline: bool,
    debug: bool,
    concurrency: usize,
    secrets_file: &Path,
    names: &[String],
) -> Result<()> {
    // Cancelled on SIGINT/SIGTERM.
    let ctx = signals::shutdown_token();

    let absolute_config_path = std::path::absolute(config_file)
        .with_context(|| format!("error resolving config path {}", config_file.display()))?;
    let source_path = absolute_config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let config = Config::from_file(config_file)?;
    let secrets = secrets::from_file(secrets_file)?;

    let runtime = Arc::new(DockerRuntime::connect().context("error building Docker client")?);
    let executor = Executor::new(runtime, source_path).debug_only(debug);

    let target = if pipeline {
        if names.is_empty() {
            anyhow::bail!("no pipeline was specified for execution");
        }
        if names.len() > 1 {
            anyhow::bail!("only one pipeline may be executed at a time");
        }
        config.pipelines(names)?.remove(0)
    } else {
        Arc::new(Pipeline::ad_hoc(config.jobs(names)?))
    };

    executor
        .execute_pipeline(&ctx, &target, &secrets, concurrency)
        .await?;
    Ok(())
}
