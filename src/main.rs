mod aggregate;
mod config;
mod dashboard;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use config::{AggregateArgs, ConfigError, DashboardArgs, FileConfig};

/// Logdeck - aggregate structured logs and browse them live
#[derive(Parser, Debug)]
#[command(name = "logdeck")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.config/logdeck/config.toml when present)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Merge pod, gcloud and pushed logs into one stream on stdout
    Aggregate(AggregateArgs),
    /// Browse records piped in on stdin
    Dashboard(DashboardArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing for debugging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            if e.chain().any(|cause| cause.is::<ConfigError>()) {
                2
            } else {
                1
            }
        }
    };

    // A reader blocked on stdin would otherwise hold the runtime open
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<()> {
    let file = FileConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Aggregate(args) => aggregate::run(args.resolve(&file)?).await,
        Commands::Dashboard(args) => dashboard::run(args.resolve(&file)?).await,
    }
}
