//! # Wallet Subcommand
//!
//! Profile addresses, balances, transfers and message signing. Signatures
//! are printed and read as hex.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use pow_client::PowClient;
use serde_json::json;

use crate::output::print_json;

#[derive(Args, Debug)]
pub struct WalletArgs {
    #[command(subcommand)]
    pub command: WalletCommand,
}

#[derive(Subcommand, Debug)]
pub enum WalletCommand {
    /// Balance of an address.
    Balance { addr: String },

    /// Create a new address for the profile.
    NewAddr {
        /// Human-readable name.
        name: String,
        /// Key type, `bls` or `secp256k1`.
        #[arg(long = "type", env = "POW_WALLET_TYPE")]
        addr_type: Option<String>,
        /// Make it the profile's default address.
        #[arg(long, env = "POW_WALLET_DEFAULT")]
        default: bool,
    },

    /// List the profile's addresses.
    Addrs,

    /// Send funds between addresses.
    Send {
        from: String,
        to: String,
        amount: u64,
    },

    /// Sign a UTF-8 message.
    Sign { addr: String, message: String },

    /// Verify a hex signature over a UTF-8 message.
    Verify {
        addr: String,
        message: String,
        signature: String,
    },
}

pub async fn run_wallet(args: &WalletArgs, client: &PowClient) -> Result<()> {
    match &args.command {
        WalletCommand::Balance { addr } => {
            let balance = client.balance(addr).await?;
            print_json(&json!({ "addr": addr, "balance": balance }))
        }
        WalletCommand::NewAddr {
            name,
            addr_type,
            default,
        } => {
            let addr = client.new_addr(name, addr_type.clone(), *default).await?;
            print_json(&json!({ "addr": addr }))
        }
        WalletCommand::Addrs => print_json(&client.addrs().await?),
        WalletCommand::Send { from, to, amount } => {
            client.send_fil(from, to, *amount).await?;
            print_json(&json!({ "from": from, "to": to, "amount": amount }))
        }
        WalletCommand::Sign { addr, message } => {
            let signature = client.sign(addr, message.as_bytes()).await?;
            print_json(&json!({ "signature": hex::encode(signature) }))
        }
        WalletCommand::Verify {
            addr,
            message,
            signature,
        } => {
            let signature = hex::decode(signature).context("signature must be hex")?;
            let valid = client.verify(addr, message.as_bytes(), &signature).await?;
            print_json(&json!({ "valid": valid }))
        }
    }
}
