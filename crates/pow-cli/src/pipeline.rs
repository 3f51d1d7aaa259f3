//! # Pipeline Subcommand
//!
//! Bulk stage/apply/watch of every top-level entry of a folder, with a
//! results file that `resume` continues from.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use pow_client::pipeline::{Pipeline, PipelineConfig, ResultsFile};
use pow_client::PowClient;

use crate::output::{load_config, print_json};

const DEFAULT_RESULTS: &str = "pow-pipeline-results.json";

#[derive(Args, Debug)]
pub struct PipelineArgs {
    #[command(subcommand)]
    pub command: PipelineCommand,
}

#[derive(Subcommand, Debug)]
pub enum PipelineCommand {
    /// Process a folder.
    Run {
        /// Folder whose top-level entries become tasks.
        folder: PathBuf,
        /// Include hidden entries.
        #[arg(long, env = "POW_PIPELINE_ALL")]
        all: bool,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Continue from a results file.
    Resume {
        /// Restart errored tasks from the beginning.
        #[arg(long, env = "POW_PIPELINE_RETRY_ERRORS")]
        retry_errors: bool,
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Results file tracking every task.
    #[arg(long, env = "POW_PIPELINE_RESULTS", default_value = DEFAULT_RESULTS)]
    pub results: PathBuf,
    /// Storage config applied to every task; the profile default when omitted.
    #[arg(short, long, env = "POW_PIPELINE_CONFIG")]
    pub config: Option<PathBuf>,
    /// Budget for bytes staged but not yet stored in a deal.
    #[arg(long, env = "POW_PIPELINE_MAX_STAGED_BYTES")]
    pub max_staged_bytes: Option<u64>,
    /// Largest item accepted for one deal.
    #[arg(long, env = "POW_PIPELINE_MAX_DEAL_BYTES")]
    pub max_deal_bytes: Option<u64>,
    /// Simulate every step without calling the server.
    #[arg(long, env = "POW_PIPELINE_DRY_RUN")]
    pub dry_run: bool,
    /// Poll job progress at mainnet pace.
    #[arg(long, env = "POW_PIPELINE_MAINNET")]
    pub mainnet: bool,
}

impl CommonArgs {
    pub fn to_config(&self) -> Result<PipelineConfig> {
        let defaults = PipelineConfig::default();
        let storage_config = self.config.as_deref().map(load_config).transpose()?;
        Ok(PipelineConfig {
            max_staged_bytes: self.max_staged_bytes.unwrap_or(defaults.max_staged_bytes),
            max_deal_bytes: self.max_deal_bytes.unwrap_or(defaults.max_deal_bytes),
            storage_config,
            dry_run: self.dry_run,
            ..defaults
        }
        .with_mainnet(self.mainnet))
    }
}

pub async fn run_pipeline(args: &PipelineArgs, client: &PowClient) -> Result<()> {
    let pipeline = match &args.command {
        PipelineCommand::Run {
            folder,
            all,
            common,
        } => Pipeline::for_folder(
            client.clone(),
            common.to_config()?,
            ResultsFile::new(&common.results),
            folder,
            *all,
        )
        .with_context(|| format!("preparing pipeline for {}", folder.display()))?,
        PipelineCommand::Resume {
            retry_errors,
            common,
        } => Pipeline::resume(
            client.clone(),
            common.to_config()?,
            ResultsFile::new(&common.results),
            *retry_errors,
        )
        .with_context(|| format!("resuming from {}", common.results.display()))?,
    };
    let report = pipeline.run().await?;
    print_json(&report)
}
