//! # Cid Store
//!
//! Maps `(profile, cid)` to the current storage config and the last
//! observed [`CidInfo`].
//!
//! ```text
//! cids/<profile_id>/<cid>/config -> StorageConfig
//! cids/<profile_id>/<cid>/info   -> CidInfo
//! ```
//!
//! Writes for one key are serialized by a per-key lock so a
//! check-then-write (`put_config` without override, `remove`) cannot race.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use pow_core::{Cid, CidInfo, JobKey, ProfileId, StorageConfig};

use crate::error::StoreError;
use crate::kv::{get_json, put_json, BatchOp, Datastore};

const CIDS_PREFIX: &str = "cids/";

fn config_key(profile: ProfileId, cid: &Cid) -> String {
    format!("{CIDS_PREFIX}{profile}/{cid}/config")
}

fn info_key(profile: ProfileId, cid: &Cid) -> String {
    format!("{CIDS_PREFIX}{profile}/{cid}/info")
}

/// A persisted config together with its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedConfig {
    pub profile_id: ProfileId,
    pub cid: Cid,
    pub config: StorageConfig,
}

/// Config and info store keyed by `(profile, cid)`.
pub struct CidStore {
    ds: Arc<dyn Datastore>,
    locks: DashMap<JobKey, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for CidStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CidStore")
            .field("locked_keys", &self.locks.len())
            .finish_non_exhaustive()
    }
}

impl CidStore {
    pub fn new(ds: Arc<dyn Datastore>) -> Self {
        Self {
            ds,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, profile: ProfileId, cid: &Cid) -> Arc<Mutex<()>> {
        let key = JobKey {
            profile_id: profile,
            cid: cid.clone(),
        };
        Arc::clone(self.locks.entry(key).or_default().value())
    }

    pub fn get_config(
        &self,
        profile: ProfileId,
        cid: &Cid,
    ) -> Result<Option<StorageConfig>, StoreError> {
        get_json(self.ds.as_ref(), &config_key(profile, cid))
    }

    /// Store a config. Fails with `AlreadyExists` when one is stored and
    /// `override_existing` is false.
    pub fn put_config(
        &self,
        profile: ProfileId,
        cid: &Cid,
        config: &StorageConfig,
        override_existing: bool,
    ) -> Result<(), StoreError> {
        let lock = self.lock_for(profile, cid);
        let _guard = lock.lock();
        let key = config_key(profile, cid);
        if !override_existing && self.ds.get(&key)?.is_some() {
            return Err(StoreError::AlreadyExists(format!("{profile}/{cid}")));
        }
        put_json(self.ds.as_ref(), &key, config)
    }

    pub fn get_info(&self, profile: ProfileId, cid: &Cid) -> Result<Option<CidInfo>, StoreError> {
        get_json(self.ds.as_ref(), &info_key(profile, cid))
    }

    /// Overwrite the info snapshot for the info's own key.
    pub fn put_info(&self, info: &CidInfo) -> Result<(), StoreError> {
        let lock = self.lock_for(info.profile_id, &info.cid);
        let _guard = lock.lock();
        put_json(
            self.ds.as_ref(),
            &info_key(info.profile_id, &info.cid),
            info,
        )
    }

    /// Drop config and info. Refused while the config enables a tier.
    pub fn remove(&self, profile: ProfileId, cid: &Cid) -> Result<(), StoreError> {
        let lock = self.lock_for(profile, cid);
        let _guard = lock.lock();
        let config: StorageConfig = get_json(self.ds.as_ref(), &config_key(profile, cid))?
            .ok_or_else(|| StoreError::NotFound(format!("storage config for {cid}")))?;
        if config.hot.enabled || config.cold.enabled {
            return Err(StoreError::ActiveInStorage(cid.to_string()));
        }
        self.ds.batch(vec![
            BatchOp::Delete(config_key(profile, cid)),
            BatchOp::Delete(info_key(profile, cid)),
        ])?;
        tracing::debug!(profile_id = %profile, cid = %cid, "removed cid");
        Ok(())
    }

    /// Info snapshots of a profile, optionally restricted to `filter`.
    pub fn list(&self, profile: ProfileId, filter: &[Cid]) -> Result<Vec<CidInfo>, StoreError> {
        let prefix = format!("{CIDS_PREFIX}{profile}/");
        let mut out = Vec::new();
        for (key, bytes) in self.ds.scan_prefix(&prefix)? {
            if !key.ends_with("/info") {
                continue;
            }
            let info: CidInfo = crate::kv::decode(&key, &bytes)?;
            if filter.is_empty() || filter.contains(&info.cid) {
                out.push(info);
            }
        }
        Ok(out)
    }

    /// Info snapshots across all profiles.
    pub fn list_all(&self) -> Result<Vec<CidInfo>, StoreError> {
        let mut out = Vec::new();
        for (key, bytes) in self.ds.scan_prefix(CIDS_PREFIX)? {
            if key.ends_with("/info") {
                out.push(crate::kv::decode(&key, &bytes)?);
            }
        }
        Ok(out)
    }

    /// Every stored config, in key order.
    pub fn configs(&self) -> Result<Vec<TrackedConfig>, StoreError> {
        let mut out = Vec::new();
        for (key, bytes) in self.ds.scan_prefix(CIDS_PREFIX)? {
            let Some(rest) = key
                .strip_prefix(CIDS_PREFIX)
                .and_then(|k| k.strip_suffix("/config"))
            else {
                continue;
            };
            let Some((profile, cid)) = rest.split_once('/') else {
                continue;
            };
            let (Ok(profile_id), Ok(cid)) = (profile.parse::<ProfileId>(), cid.parse::<Cid>())
            else {
                tracing::warn!(key = %key, "skipping malformed cid config key");
                continue;
            };
            let config: StorageConfig = crate::kv::decode(&key, &bytes)?;
            out.push(TrackedConfig {
                profile_id,
                cid,
                config,
            });
        }
        Ok(out)
    }

    /// Configs the periodic reconciler looks after.
    pub fn list_tracked(&self) -> Result<Vec<TrackedConfig>, StoreError> {
        Ok(self
            .configs()?
            .into_iter()
            .filter(|t| t.config.is_tracked())
            .collect())
    }
}
