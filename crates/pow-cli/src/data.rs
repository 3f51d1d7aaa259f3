//! # Data Subcommand
//!
//! Staging, retrieval, replacement and per-cid logs.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use pow_client::{LogsOptions, PowClient};
use pow_core::{Cid, JobId};
use serde_json::json;

use crate::output::{print_json, print_stream};

#[derive(Args, Debug)]
pub struct DataArgs {
    #[command(subcommand)]
    pub command: DataCommand,
}

#[derive(Subcommand, Debug)]
pub enum DataCommand {
    /// Stage a file, or a folder when the path is a directory.
    Stage { path: PathBuf },

    /// Stage a folder through the IPFS add endpoint.
    StageFolder { path: PathBuf },

    /// Retrieve data by cid.
    Get {
        cid: Cid,
        /// Write to this file instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Move the storage config of one cid to another.
    Replace { cid1: Cid, cid2: Cid },

    /// Follow the log of a cid.
    Logs {
        cid: Cid,
        /// Only entries of this job.
        #[arg(long, env = "POW_LOGS_JOB_ID")]
        job_id: Option<JobId>,
        /// Replay stored entries first.
        #[arg(long, env = "POW_LOGS_HISTORY")]
        history: bool,
    },

    /// Storage info of a cid.
    Info { cid: Cid },
}

pub async fn run_data(args: &DataArgs, client: &PowClient) -> Result<()> {
    match &args.command {
        DataCommand::Stage { path } => {
            let cid = if path.is_dir() {
                client.stage_folder(path).await?
            } else {
                let data = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("reading {}", path.display()))?;
                client.stage(data).await?
            };
            print_json(&json!({ "cid": cid }))
        }
        DataCommand::StageFolder { path } => {
            anyhow::ensure!(path.is_dir(), "{} is not a directory", path.display());
            let cid = client.stage_folder(path).await?;
            print_json(&json!({ "cid": cid }))
        }
        DataCommand::Get { cid, out } => {
            let data = client.get(cid).await?;
            match out {
                Some(out) => {
                    tokio::fs::write(out, &data)
                        .await
                        .with_context(|| format!("writing {}", out.display()))?;
                    print_json(&json!({ "cid": cid, "bytes": data.len(), "out": out }))
                }
                None => {
                    let mut stdout = std::io::stdout().lock();
                    stdout.write_all(&data).context("writing to stdout")?;
                    stdout.flush().context("writing to stdout")
                }
            }
        }
        DataCommand::Replace { cid1, cid2 } => {
            let job_id = client.replace(cid1, cid2).await?;
            print_json(&json!({ "job_id": job_id }))
        }
        DataCommand::Logs {
            cid,
            job_id,
            history,
        } => {
            let opts = LogsOptions {
                job_id: *job_id,
                history: *history,
            };
            print_stream(client.watch_logs(cid, opts).await?).await
        }
        DataCommand::Info { cid } => print_json(&client.cid_info(cid).await?),
    }
}
