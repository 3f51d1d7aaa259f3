//! # pow-core — Foundational Types for Powergate
//!
//! Every other crate in the workspace depends on `pow-core`; it depends on
//! nothing internal. It holds the vocabulary of the system: who owns data
//! (profiles), what is being stored (content ids), what the owner wants
//! (storage configs), and what the engine did about it (storage jobs and
//! cid info).
//!
//! ## Key Design Principles
//!
//! 1. **Newtype identifiers.** `ProfileId` and `JobId` wrap UUIDs; `Cid` wraps
//!    the raw content-id bytes and renders as canonical base-32. You cannot
//!    pass a job id where a profile id is expected.
//!
//! 2. **Closed state machines.** `JobStatus` is a closed enum and every
//!    transition goes through [`StorageJob`] methods that return `Result`.
//!    Nothing leaves a terminal state.
//!
//! 3. **One error vocabulary.** [`ErrorKind`] enumerates the externally
//!    visible failure kinds; [`PowError`] pairs a kind with a message and is
//!    what crosses crate boundaries.
//!
//! 4. **Shared wire types.** Request and response bodies of the RPC surface
//!    live in [`rpc`] so the server and the client cannot drift apart.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `pow-*` crates.
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod config;
pub mod deal;
pub mod error;
pub mod identity;
pub mod info;
pub mod job;
pub mod log;
pub mod profile;
pub mod rpc;

pub use config::{
    ColdConfig, FilConfig, FilRenew, HotConfig, IpfsConfig, StorageConfig, MIN_DEAL_DURATION,
};
pub use deal::{
    piece_size, DealHandle, DealState, DealUpdate, MinerProposal, RetrievalDealRecord,
    StorageDealRecord,
};
pub use error::{ErrorKind, PowError, StateError, ValidationError};
pub use identity::{Cid, Codec, JobId, ProfileId};
pub use info::{CidInfo, ColdInfo, FilInfo, FilStorage, HotInfo, IpfsHotInfo};
pub use job::{DealError, DealInfo, JobKey, JobStatus, JobTransition, JobsSummary, StorageJob};
pub use log::LogEntry;
pub use profile::{AddrInfo, StorageProfile};

/// A Filecoin chain height.
pub type ChainEpoch = i64;
