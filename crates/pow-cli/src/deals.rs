//! # Deals Subcommand
//!
//! Storage and retrieval deal records of the profile's addresses.

use anyhow::Result;
use clap::{Args, Subcommand};
use pow_client::PowClient;
use pow_core::rpc::DealRecordsFilter;
use pow_core::Cid;

use crate::output::{print_json, split_list};

#[derive(Args, Debug)]
pub struct DealsArgs {
    #[command(subcommand)]
    pub command: DealsCommand,
}

#[derive(Subcommand, Debug)]
pub enum DealsCommand {
    /// Storage deal records.
    Storage(FilterArgs),
    /// Retrieval deal records.
    Retrieval(FilterArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Comma-separated wallet addresses; all of the profile's when omitted.
    #[arg(long, env = "POW_DEALS_ADDRS")]
    pub addrs: Option<String>,
    /// Comma-separated cids.
    #[arg(long, env = "POW_DEALS_CIDS")]
    pub cids: Option<String>,
    /// Include deals that are not active yet.
    #[arg(long, env = "POW_DEALS_INCLUDE_PENDING")]
    pub include_pending: bool,
    /// Leave out active deals.
    #[arg(long, env = "POW_DEALS_EXCLUDE_FINAL")]
    pub exclude_final: bool,
    /// Oldest first.
    #[arg(long, env = "POW_DEALS_ASCENDING")]
    pub ascending: bool,
}

impl FilterArgs {
    pub fn to_filter(&self) -> Result<DealRecordsFilter> {
        let cids = split_list(self.cids.as_deref())
            .iter()
            .map(|c| c.parse::<Cid>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DealRecordsFilter {
            addrs: split_list(self.addrs.as_deref()),
            cids,
            include_pending: self.include_pending,
            include_final: !self.exclude_final,
            ascending: self.ascending,
        })
    }
}

pub async fn run_deals(args: &DealsArgs, client: &PowClient) -> Result<()> {
    match &args.command {
        DealsCommand::Storage(filter) => {
            print_json(&client.storage_deal_records(&filter.to_filter()?).await?)
        }
        DealsCommand::Retrieval(filter) => {
            print_json(&client.retrieval_deal_records(&filter.to_filter()?).await?)
        }
    }
}
