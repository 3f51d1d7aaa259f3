//! # pow-cli — Powergate Command-Line Client
//!
//! Thin clap front end over [`pow_client::PowClient`]. Every result is
//! printed as pretty JSON on stdout; streams print one document per item.
//!
//! ## Subcommands
//!
//! - `wallet` — balances, addresses, transfers, signing
//! - `data` — stage, retrieve, replace, logs, cid info
//! - `config` — default config, apply, remove
//! - `deals` — storage and retrieval deal records
//! - `storage-jobs` — job lookup, listing, watch, cancel, summary
//! - `storage-info` — stored cid info
//! - `admin` — profiles, fleet addresses, cross-profile listings
//! - `pipeline` — bulk stage/apply/watch of a folder, and resume
//!
//! ## Crate Policy
//!
//! - Argument parsing lives here; behavior lives in `pow-client`.
//! - Every flag can also be set through its `POW_*` environment variable.

pub mod admin;
pub mod data;
pub mod deals;
pub mod jobs;
pub mod output;
pub mod pipeline;
pub mod storage_config;
pub mod wallet;

use anyhow::{Context, Result};
use clap::Args;
use pow_client::{PowClient, DEFAULT_SERVER_ADDRESS};

/// Connection flags shared by every subcommand.
#[derive(Args, Clone)]
pub struct GlobalArgs {
    /// Address of the Powergate server.
    #[arg(long, global = true, env = "POW_SERVER_ADDRESS", default_value = DEFAULT_SERVER_ADDRESS)]
    pub server_address: String,

    /// Profile auth token.
    #[arg(short, long, global = true, env = "POW_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Admin auth token.
    #[arg(long, global = true, env = "POW_ADMIN_TOKEN", hide_env_values = true)]
    pub admin_token: Option<String>,
}

impl std::fmt::Debug for GlobalArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalArgs")
            .field("server_address", &self.server_address)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("admin_token", &self.admin_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl GlobalArgs {
    /// A client carrying whichever tokens were given.
    pub fn client(&self) -> Result<PowClient> {
        let mut client = PowClient::new(&self.server_address)
            .with_context(|| format!("invalid server address {}", self.server_address))?;
        if let Some(token) = &self.token {
            client = client.with_token(token.clone());
        }
        if let Some(token) = &self.admin_token {
            client = client.with_admin_token(token.clone());
        }
        Ok(client)
    }
}
