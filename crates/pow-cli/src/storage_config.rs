//! # Config Subcommand
//!
//! The profile's default storage config, and applying or removing configs
//! for a cid. Config files are JSON, or YAML for `.yaml`/`.yml`.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};
use pow_client::{ApplyOptions, PowClient};
use pow_core::Cid;
use serde_json::json;

use crate::output::{load_config, print_json};

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the profile's default storage config.
    Default,

    /// Replace the profile's default storage config.
    SetDefault { file: PathBuf },

    /// Apply a storage config to a cid.
    Apply {
        cid: Cid,
        /// Config file; the profile default when omitted.
        #[arg(short, long, env = "POW_CONFIG_FILE")]
        config: Option<PathBuf>,
        /// Replace an existing config for the cid.
        #[arg(short, long = "override", env = "POW_CONFIG_OVERRIDE")]
        override_config: bool,
        /// Wait for the job to finish, printing each update.
        #[arg(short, long)]
        watch: bool,
    },

    /// Forget the config of a cid whose storage is disabled.
    Remove { cid: Cid },
}

pub async fn run_config(args: &ConfigArgs, client: &PowClient) -> Result<()> {
    match &args.command {
        ConfigCommand::Default => print_json(&client.default_config().await?),
        ConfigCommand::SetDefault { file } => {
            let config = load_config(file)?;
            client.set_default_config(config.clone()).await?;
            print_json(&config)
        }
        ConfigCommand::Apply {
            cid,
            config,
            override_config,
            watch,
        } => {
            let opts = ApplyOptions {
                config: config.as_deref().map(load_config).transpose()?,
                override_config: *override_config,
            };
            let job_id = client.apply(cid, opts).await?;
            print_json(&json!({ "job_id": job_id }))?;
            if *watch {
                crate::output::print_stream(client.watch_jobs(&[job_id]).await?).await?;
            }
            Ok(())
        }
        ConfigCommand::Remove { cid } => {
            client.remove(cid).await?;
            print_json(&json!({ "removed": cid }))
        }
    }
}
