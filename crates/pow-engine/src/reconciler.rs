//! # Periodic Reconciler
//!
//! Sweeps every tracked `(profile, cid)` on an interval and enqueues a
//! reconciler job where a deal is due for renewal or replication has
//! fallen below `rep_factor`. Jobs go through the scheduler, so they obey
//! single flight like any other job.

use std::sync::Arc;
use std::time::Duration;

use pow_core::{ChainEpoch, FilStorage, JobId, PowError, StorageConfig};
use pow_store::TrackedConfig;
use tokio::task::JoinHandle;

use crate::capability::Capabilities;
use crate::executor::{already_renewed, distinct_miners};
use crate::metrics;
use crate::scheduler::Scheduler;

/// Result of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Tracked cids examined.
    pub scanned: usize,
    /// Jobs enqueued.
    pub enqueued: Vec<JobId>,
    /// Cids skipped because their state could not be read.
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    scheduler: Scheduler,
    caps: Capabilities,
}

/// Whether the deals of a tracked cid call for a reconciler job.
pub fn needs_action(config: &StorageConfig, active: &[FilStorage], height: ChainEpoch) -> bool {
    let fil = &config.cold.filecoin;
    let repair = config.repairable && distinct_miners(active).len() < fil.rep_factor as usize;
    let renew = fil.renew.enabled
        && active
            .iter()
            .any(|d| d.remaining(height) < fil.renew.threshold && !already_renewed(d, active));
    repair || renew
}

impl Reconciler {
    pub fn new(scheduler: Scheduler, caps: Capabilities) -> Self {
        Self { scheduler, caps }
    }

    /// Run one sweep.
    pub async fn run_once(&self) -> Result<SweepReport, PowError> {
        let stores = self.scheduler.stores();
        let height = self
            .caps
            .cold
            .height()
            .await
            .map_err(|e| e.context("chain height"))?;
        let tracked = stores.cids.list_tracked()?;
        let mut report = SweepReport {
            scanned: tracked.len(),
            ..SweepReport::default()
        };

        for TrackedConfig {
            profile_id,
            cid,
            config,
        } in tracked
        {
            let mut wallets = stores
                .profiles
                .get(profile_id)?
                .map(|p| p.addr_list())
                .unwrap_or_default();
            let addr = &config.cold.filecoin.addr;
            if !addr.is_empty() && !wallets.contains(addr) {
                wallets.push(addr.clone());
            }
            let active = match self.caps.cold.list_active_deals(&cid, &wallets).await {
                Ok(active) => active,
                Err(e) => {
                    tracing::warn!(profile_id = %profile_id, cid = %cid, error = %e, "skipping cid in sweep");
                    report.skipped += 1;
                    continue;
                }
            };
            if !needs_action(&config, &active, height) {
                continue;
            }
            match self
                .scheduler
                .enqueue_reconcile(profile_id, cid.clone(), config)
                .await?
            {
                Some(id) => {
                    tracing::info!(profile_id = %profile_id, cid = %cid, job_id = %id, "enqueued reconciler job");
                    report.enqueued.push(id);
                }
                None => {
                    tracing::debug!(profile_id = %profile_id, cid = %cid, "job already live; not enqueuing");
                }
            }
        }
        metrics::record_sweep(report.enqueued.len());
        tracing::info!(
            scanned = report.scanned,
            enqueued = report.enqueued.len(),
            skipped = report.skipped,
            height,
            "reconciler sweep finished"
        );
        Ok(report)
    }

    /// Sweep every `interval` until the scheduler shuts down. The first
    /// sweep runs one interval after spawning.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let mut shutdown = self.scheduler.shutdown_signal();
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once().await {
                            tracing::warn!(error = %e, "reconciler sweep failed");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
            tracing::debug!("reconciler stopped");
        })
    }
}
