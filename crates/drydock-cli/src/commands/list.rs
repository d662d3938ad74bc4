use std::path::Path;

use anyhow::Result;
use drydock_config::Config;

/// Execute the `list` command: print job (or pipeline) names, one per line,
/// in the resolver's lexical order.
pub fn execute(config_file: &Path, pipelines: bool) -> Result<()> {
    let config = Config::from_file(config_file)?;
    if pipelines {
        for pipeline in config.all_pipelines() {
            println!("{}", pipeline.name());
        }
    } else {
        for job in config.all_jobs() {
            println!("{}", job.name());
        }
    }
    Ok(())
}
