//! Shared harness: a Powergate over devnet back-ends with one profile.

#![allow(dead_code)]

use std::time::Duration;

use bytes::Bytes;
use pow_core::{Cid, Codec, JobId, JobStatus, ProfileId, StorageConfig, StorageJob};
use pow_devnet::{Devnet, DevnetConfig, MinerSpec};
use pow_engine::{EngineConfig, Powergate};
use pow_store::Stores;
use tokio::task::JoinHandle;

pub const TIMEOUT: Duration = Duration::from_secs(15);

pub fn engine_config() -> EngineConfig {
    EngineConfig::default()
        .with_poll_interval(Duration::from_millis(10))
        .with_deal_finality_timeout(Duration::from_secs(10))
        .with_infra_retries(2, Duration::from_millis(10))
}

pub fn devnet(miners: Vec<MinerSpec>) -> Devnet {
    Devnet::new(
        DevnetConfig::default()
            .with_miners(miners)
            .with_block_time(Duration::from_millis(5)),
    )
    .unwrap()
}

pub fn miners(addrs: &[&str]) -> Vec<MinerSpec> {
    addrs.iter().map(|a| MinerSpec::new(*a)).collect()
}

/// A running Powergate plus the devnet behind it.
pub struct Node {
    pub devnet: Devnet,
    pub pow: Powergate,
    pub profile: ProfileId,
    pub token: String,
    chain: Vec<JoinHandle<()>>,
}

impl Node {
    pub async fn start(miners: Vec<MinerSpec>) -> Self {
        Self::start_on(Stores::in_memory().unwrap(), devnet(miners)).await
    }

    /// Start over existing stores and devnet, creating a fresh profile.
    pub async fn start_on(stores: Stores, devnet: Devnet) -> Self {
        let chain = devnet.spawn();
        let pow = Powergate::new(stores, devnet.capabilities(), engine_config());
        pow.start().unwrap();
        let (profile, token) = pow.create_profile().await.unwrap();
        Self {
            devnet,
            pow,
            profile: profile.id,
            token,
            chain,
        }
    }

    pub fn config(&self) -> StorageConfig {
        self.pow.default_config(self.profile).unwrap()
    }

    pub async fn stage(&self, data: &[u8]) -> Cid {
        self.pow
            .stage(self.profile, Bytes::copy_from_slice(data), Codec::Raw)
            .await
            .unwrap()
    }

    pub async fn apply(&self, cid: &Cid, config: Option<StorageConfig>, override_config: bool) -> JobId {
        self.pow
            .apply(self.profile, cid.clone(), config, override_config)
            .await
            .unwrap()
    }

    pub async fn terminal(&self, id: JobId) -> StorageJob {
        assert!(
            self.pow.scheduler().wait_terminal(&[id], TIMEOUT).await.unwrap(),
            "job {id} did not finish"
        );
        self.pow.job(self.profile, id).unwrap()
    }

    pub async fn wait_status(&self, id: JobId, status: JobStatus) {
        let deadline = tokio::time::Instant::now() + TIMEOUT;
        loop {
            let job = self.pow.job(self.profile, id).unwrap();
            if job.status == status {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {id} stuck in {} waiting for {status}",
                job.status
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn stop(&self) {
        self.pow.shutdown(Duration::from_millis(200)).await;
        for task in &self.chain {
            task.abort();
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        for task in &self.chain {
            task.abort();
        }
    }
}
