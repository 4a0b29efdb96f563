use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use cirun::config::Config;

mod cmd;

#[derive(Parser)]
#[command(name = "cirun")]
#[command(version, about = "Run orchestrator for ServiceNow CI-update workflows")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory holding the state document and cirun.toml. Defaults to
    /// the platform data directory.
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Parse pasted text and print the structured result as JSON
    Parse {
        /// Input file, or - for stdin
        input: PathBuf,
    },
    /// Rehearse a run against the simulated instance
    Run {
        /// Input file, or - for stdin
        input: PathBuf,

        /// Items that already exist in the instance (repeatable)
        #[arg(long)]
        existing: Vec<String>,

        /// Override the between-item delay in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,
    },
    /// Show the persisted run state
    Status,
    /// Clear the persisted run state
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "cirun=debug" } else { "cirun=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::new(cli.state_dir.clone())?;

    match &cli.command {
        Commands::Parse { input } => cmd::cmd_parse(input)?,
        Commands::Run {
            input,
            existing,
            delay_ms,
        } => cmd::cmd_run(&config, input, existing.clone(), *delay_ms).await?,
        Commands::Status => cmd::cmd_status(&config).await?,
        Commands::Reset => cmd::cmd_reset(&config)?,
    }

    Ok(())
}
