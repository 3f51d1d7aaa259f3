//! # pow-store — Durable State for Powergate
//!
//! Every piece of state that must survive a restart lives here, each store
//! in its own key namespace of one [`Datastore`]:
//!
//! | Store | Namespace | Holds |
//! |---|---|---|
//! | [`JobStore`] | `jobs/`, `jobs_by_profile/` | storage jobs, queue, watch fan-out |
//! | [`CidStore`] | `cids/` | per-cid config and info |
//! | [`ProfileStore`] | `profile/`, `auth/` | profiles and tokens |
//! | [`CidLogStore`] | `logs/` | per-cid human log |
//! | [`DealStore`] | `started/`, `deals/` | in-flight deals, deal history |
//!
//! ## Design
//!
//! Stores are synchronous. Their locks are `parking_lot` and are never held
//! across an `.await`; callers in async code call them directly. Watch
//! subscribers receive through bounded `tokio` channels and never block a
//! writer.
//!
//! ## Crate Policy
//!
//! - Depends only on `pow-core` internally.
//! - No `unsafe` code; no `.unwrap()` outside tests.

pub mod cid_store;
pub mod deal_store;
pub mod error;
pub mod job_store;
pub mod kv;
pub mod log_store;
pub mod profile_store;

use std::sync::Arc;

pub use cid_store::{CidStore, TrackedConfig};
pub use deal_store::DealStore;
pub use error::StoreError;
pub use job_store::{
    CancelOutcome, ClaimedJob, JobPage, JobQuery, JobStore, JobWatch, WatchFilter, WATCH_BUFFER,
};
pub use kv::{BatchOp, Datastore, MemDatastore, RedbDatastore};
pub use log_store::CidLogStore;
pub use profile_store::ProfileStore;

/// All stores over one datastore.
#[derive(Debug, Clone)]
pub struct Stores {
    pub jobs: Arc<JobStore>,
    pub cids: Arc<CidStore>,
    pub profiles: Arc<ProfileStore>,
    pub logs: Arc<CidLogStore>,
    pub deals: Arc<DealStore>,
}

impl Stores {
    /// Open every store on `ds`.
    pub fn open(ds: Arc<dyn Datastore>) -> Result<Self, StoreError> {
        Ok(Self {
            jobs: Arc::new(JobStore::open(Arc::clone(&ds))?),
            cids: Arc::new(CidStore::new(Arc::clone(&ds))),
            profiles: Arc::new(ProfileStore::new(Arc::clone(&ds))),
            logs: Arc::new(CidLogStore::new(Arc::clone(&ds))),
            deals: Arc::new(DealStore::new(ds)),
        })
    }

    /// Stores over a fresh in-memory datastore.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::open(Arc::new(MemDatastore::new()))
    }
}
