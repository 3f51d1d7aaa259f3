//! # pow CLI entry point
//!
//! Parses command-line arguments and dispatches to subcommand handlers.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pow_cli::admin::{run_admin, AdminArgs};
use pow_cli::data::{run_data, DataArgs};
use pow_cli::deals::{run_deals, DealsArgs};
use pow_cli::jobs::{run_info, run_jobs, InfoArgs, JobsArgs};
use pow_cli::pipeline::{run_pipeline, PipelineArgs};
use pow_cli::storage_config::{run_config, ConfigArgs};
use pow_cli::wallet::{run_wallet, WalletArgs};
use pow_cli::GlobalArgs;

/// Powergate command-line client.
#[derive(Parser, Debug)]
#[command(name = "pow", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Wallet addresses, balances, transfers and signing.
    Wallet(WalletArgs),
    /// Stage, retrieve and replace data.
    Data(DataArgs),
    /// Storage configs.
    Config(ConfigArgs),
    /// Deal records.
    Deals(DealsArgs),
    /// Storage jobs.
    StorageJobs(JobsArgs),
    /// Storage info.
    StorageInfo(InfoArgs),
    /// Administration.
    Admin(AdminArgs),
    /// Bulk processing of a folder.
    Pipeline(PipelineArgs),
    /// Print the client version.
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Commands::Version = cli.command {
        return pow_cli::output::print_json(&serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
        }));
    }
    let client = cli.global.client()?;
    tracing::debug!(server = %client.base_url(), "pow starting");

    match &cli.command {
        Commands::Wallet(args) => run_wallet(args, &client).await,
        Commands::Data(args) => run_data(args, &client).await,
        Commands::Config(args) => run_config(args, &client).await,
        Commands::Deals(args) => run_deals(args, &client).await,
        Commands::StorageJobs(args) => run_jobs(args, &client).await,
        Commands::StorageInfo(args) => run_info(args, &client).await,
        Commands::Admin(args) => run_admin(args, &client).await,
        Commands::Pipeline(args) => run_pipeline(args, &client).await,
        Commands::Version => Ok(()),
    }
}
