mod commands;
mod logging;
mod secrets;
mod signals;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "drydock",
    version,
    about = "Execute CI jobs and pipelines against the local Docker daemon"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "Drakefile.yaml", global = true)]
    file: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List jobs or pipelines, one name per line
    #[command(alias = "ls")]
    List {
        /// List pipelines instead of jobs
        #[arg(long)]
        pipeline: bool,
    },
    /// Execute jobs or a pipeline
    Run {
        /// Execute a pipeline instead of jobs
        #[arg(long)]
        pipeline: bool,

        /// Print what would run without touching the daemon
        #[arg(long)]
        debug: bool,

        /// Maximum number of jobs to execute at once
        #[arg(long, default_value_t = 1)]
        concurrency: usize,

        /// Path to the secrets file
        #[arg(long, default_value = "Drakesecrets.yaml")]
        secrets: PathBuf,

        /// Names of the jobs (or the pipeline) to execute
        #[arg(required = true)]
        names: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::List { pipeline } => commands::list::execute(&cli.file, pipeline),
        Commands::Run {
            pipeline,
            debug,
            concurrency,
            secrets,
            names,
        } => commands::run::execute(&cli.file, pipeline, debug, concurrency, &secrets, &names).await,
    }
}
