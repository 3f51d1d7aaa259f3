//! # Storage Jobs and Storage Info Subcommands

use anyhow::Result;
use clap::{Args, Subcommand, ValueEnum};
use pow_client::PowClient;
use pow_core::rpc::{ListJobsQuery, ListSelect};
use pow_core::{Cid, JobId};
use serde_json::json;

use crate::output::{print_json, print_stream, split_list};

#[derive(Args, Debug)]
pub struct JobsArgs {
    #[command(subcommand)]
    pub command: JobsCommand,
}

#[derive(Subcommand, Debug)]
pub enum JobsCommand {
    /// Show one job.
    Get { id: JobId },
    /// List jobs.
    List(ListArgs),
    /// Follow job updates until every listed job is final. With no ids,
    /// follow all jobs.
    Watch { ids: Vec<JobId> },
    /// Cancel a job.
    Cancel { id: JobId },
    /// Queued, executing and latest final jobs.
    Summary {
        /// Comma-separated cids.
        #[arg(long, env = "POW_JOBS_CIDS")]
        cids: Option<String>,
    },
    /// The config snapshot a job runs with.
    Config { id: JobId },
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum Select {
    #[default]
    All,
    Queued,
    Executing,
    Final,
}

impl From<Select> for ListSelect {
    fn from(select: Select) -> Self {
        match select {
            Select::All => ListSelect::All,
            Select::Queued => ListSelect::Queued,
            Select::Executing => ListSelect::Executing,
            Select::Final => ListSelect::Final,
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    /// Only jobs for this cid.
    #[arg(long, env = "POW_JOBS_CID")]
    pub cid: Option<Cid>,
    /// Page size.
    #[arg(long, env = "POW_JOBS_LIMIT")]
    pub limit: Option<i64>,
    /// Oldest first.
    #[arg(long, env = "POW_JOBS_ASCENDING")]
    pub ascending: bool,
    #[arg(long, value_enum, default_value_t = Select::All, env = "POW_JOBS_SELECT")]
    pub select: Select,
    /// Token from a previous page.
    #[arg(long, env = "POW_JOBS_NEXT_PAGE_TOKEN")]
    pub next_page_token: Option<String>,
}

impl ListArgs {
    pub fn to_query(&self) -> ListJobsQuery {
        ListJobsQuery {
            cid: self.cid.clone(),
            limit: self.limit,
            ascending: self.ascending,
            select: self.select.into(),
            next_page_token: self.next_page_token.clone(),
        }
    }
}

pub(crate) fn parse_cids(raw: Option<&str>) -> Result<Vec<Cid>> {
    Ok(split_list(raw)
        .iter()
        .map(|c| c.parse::<Cid>())
        .collect::<Result<Vec<_>, _>>()?)
}

pub async fn run_jobs(args: &JobsArgs, client: &PowClient) -> Result<()> {
    match &args.command {
        JobsCommand::Get { id } => print_json(&client.job(*id).await?),
        JobsCommand::List(list) => print_json(&client.list_jobs(&list.to_query()).await?),
        JobsCommand::Watch { ids } => print_stream(client.watch_jobs(ids).await?).await,
        JobsCommand::Cancel { id } => {
            client.cancel_job(*id).await?;
            print_json(&json!({ "canceled": id }))
        }
        JobsCommand::Summary { cids } => {
            let cids = parse_cids(cids.as_deref())?;
            print_json(&client.jobs_summary(&cids).await?)
        }
        JobsCommand::Config { id } => print_json(&client.job_config(*id).await?),
    }
}

// ── storage-info ─────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct InfoArgs {
    #[command(subcommand)]
    pub command: InfoCommand,
}

#[derive(Subcommand, Debug)]
pub enum InfoCommand {
    /// Storage info of one cid.
    Get { cid: Cid },
    /// Storage info of several cids, or all stored cids.
    List {
        /// Comma-separated cids.
        #[arg(long, env = "POW_INFO_CIDS")]
        cids: Option<String>,
    },
}

pub async fn run_info(args: &InfoArgs, client: &PowClient) -> Result<()> {
    match &args.command {
        InfoCommand::Get { cid } => print_json(&client.storage_info(cid).await?),
        InfoCommand::List { cids } => {
            let cids = parse_cids(cids.as_deref())?;
            print_json(&client.storage_infos(&cids).await?)
        }
    }
}
