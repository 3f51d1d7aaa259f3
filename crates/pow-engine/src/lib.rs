//! # pow-engine — The Powergate Storage Engine
//!
//! Drives every `(profile, cid)` toward its [`StorageConfig`](pow_core::StorageConfig)
//! across a hot tier (fast content-addressed storage) and a cold tier
//! (storage deals with miners).
//!
//! | Module | Role |
//! |---|---|
//! | [`capability`] | traits the engine talks to: hot, cold, miner selection, wallet |
//! | [`selector`] | fixed and ask-scored miner selectors |
//! | [`executor`] | runs one job to a terminal status |
//! | [`scheduler`] | admission, single flight, worker pool |
//! | [`reconciler`] | periodic repair and renewal sweeps |
//! | [`service`] | profile-scoped facade used by the RPC layer |
//! | [`config`] | engine tuning knobs |
//! | [`metrics`] | job and sweep counters |
//!
//! ## Design
//!
//! Back-ends are reached only through the [`capability`] traits, bundled in
//! [`Capabilities`] as `Arc<dyn _>`. The devnet crate implements them in
//! memory; a production deployment would implement them against real
//! nodes. The engine itself holds no state outside `pow-store`, so a
//! restart loses nothing but in-memory watches.
//!
//! ## Crate Policy
//!
//! - Depends on `pow-core` and `pow-store` internally.
//! - No `unsafe` code; no `.unwrap()` outside tests.
//! - Synchronous locks are never held across an `.await`.

pub mod capability;
pub mod config;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod reconciler;
mod retry;
pub mod scheduler;
pub mod selector;
pub mod service;

#[cfg(test)]
mod fakes;

pub use capability::{
    Capabilities, ColdStorage, DealParams, FetchOptions, FetchOutcome, HotStorage, MinerSelector,
    SelectConstraints, StoreOutcome, WalletManager,
};
pub use config::EngineConfig;
pub use error::CapabilityError;
pub use executor::{Executor, JobOutcome};
pub use reconciler::{needs_action, Reconciler, SweepReport};
pub use scheduler::Scheduler;
pub use selector::{FixedMinerSelector, MinerAsk, ScoredMinerSelector};
pub use service::Powergate;
