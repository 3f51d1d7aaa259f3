//! # Admin Subcommand
//!
//! Requires `--admin-token` (or `POW_ADMIN_TOKEN`) unless the server runs
//! without one.

use anyhow::Result;
use clap::{Args, Subcommand};
use pow_client::PowClient;
use serde_json::json;

use crate::jobs::{parse_cids, ListArgs};
use crate::output::print_json;

#[derive(Args, Debug)]
pub struct AdminArgs {
    #[command(subcommand)]
    pub command: AdminCommand,
}

#[derive(Subcommand, Debug)]
pub enum AdminCommand {
    /// Storage profiles.
    Profiles {
        #[command(subcommand)]
        command: ProfilesCommand,
    },
    /// Fleet wallet addresses.
    Addrs {
        #[command(subcommand)]
        command: AddrsCommand,
    },
    /// Jobs across all profiles.
    Jobs(ListArgs),
    /// Storage info across all profiles.
    StorageInfo {
        /// Comma-separated cids.
        #[arg(long, env = "POW_ADMIN_CIDS")]
        cids: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ProfilesCommand {
    /// Create a profile and print its id and token.
    Create,
    List,
}

#[derive(Subcommand, Debug)]
pub enum AddrsCommand {
    List,
    New {
        /// Key type, `bls` or `secp256k1`.
        #[arg(long = "type", env = "POW_ADMIN_ADDR_TYPE")]
        addr_type: Option<String>,
    },
}

pub async fn run_admin(args: &AdminArgs, client: &PowClient) -> Result<()> {
    match &args.command {
        AdminCommand::Profiles { command } => match command {
            ProfilesCommand::Create => print_json(&client.create_profile().await?),
            ProfilesCommand::List => print_json(&client.profiles().await?),
        },
        AdminCommand::Addrs { command } => match command {
            AddrsCommand::List => print_json(&client.fleet_addrs().await?),
            AddrsCommand::New { addr_type } => {
                let addr = client.fleet_new_addr(addr_type.clone()).await?;
                print_json(&json!({ "addr": addr }))
            }
        },
        AdminCommand::Jobs(list) => print_json(&client.admin_jobs(&list.to_query()).await?),
        AdminCommand::StorageInfo { cids } => {
            let cids = parse_cids(cids.as_deref())?;
            print_json(&client.admin_storage_infos(&cids).await?)
        }
    }
}
