//! orc — multi-agent coding orchestrator CLI.

mod orchestrator;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "orc", about = "Multi-agent coding orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the multi-agent configuration JSON file. Only used when no
    /// subcommand is given — `run` is the default.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides the jail root used to resolve relative
    /// `allowed_directories` entries. Defaults to the current directory.
    #[arg(short, long)]
    workspace: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the orchestrator's operator REPL
    Run {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        workspace: Option<PathBuf>,
    },
    /// Print the orchestrator's version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("orc {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Run { config, workspace }) => {
            init_tracing();
            orchestrator::run(config, workspace).await
        }
        None => {
            let Some(config) = cli.config else {
                anyhow::bail!("--config is required (or use `orc run --config <path>`)");
            };
            init_tracing();
            orchestrator::run(config, cli.workspace).await
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "orc=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
