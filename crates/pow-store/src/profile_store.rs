//! Storage profiles and their auth tokens.
//!
//! ```text
//! profile/<profile_id>/config -> StorageProfile
//! auth/<token>                -> ProfileId
//! ```

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use pow_core::{AddrInfo, ProfileId, StorageConfig, StorageProfile};
use uuid::Uuid;

use crate::error::StoreError;
use crate::kv::{decode, encode, get_json, put_json, BatchOp, Datastore};

const PROFILE_PREFIX: &str = "profile/";
const AUTH_PREFIX: &str = "auth/";

fn profile_key(id: ProfileId) -> String {
    format!("{PROFILE_PREFIX}{id}/config")
}

fn auth_key(token: &str) -> String {
    format!("{AUTH_PREFIX}{token}")
}

/// Profile persistence.
pub struct ProfileStore {
    ds: Arc<dyn Datastore>,
    write: Mutex<()>,
}

impl std::fmt::Debug for ProfileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileStore").finish_non_exhaustive()
    }
}

impl ProfileStore {
    pub fn new(ds: Arc<dyn Datastore>) -> Self {
        Self {
            ds,
            write: Mutex::new(()),
        }
    }

    /// Create a profile owning `first_addr`, whose default config pays from
    /// it. Returns the profile and its freshly minted auth token.
    pub fn create(
        &self,
        first_addr: AddrInfo,
        default_config: StorageConfig,
    ) -> Result<(StorageProfile, String), StoreError> {
        let _guard = self.write.lock();
        let profile = StorageProfile {
            id: ProfileId::new(),
            created_at: Utc::now(),
            default_config: default_config.with_addr(first_addr.addr.clone()),
            addrs: vec![first_addr],
        };
        let token = Uuid::new_v4().simple().to_string();
        let pkey = profile_key(profile.id);
        let akey = auth_key(&token);
        self.ds.batch(vec![
            BatchOp::Put(pkey.clone(), encode(&pkey, &profile)?),
            BatchOp::Put(akey.clone(), encode(&akey, &profile.id)?),
        ])?;
        tracing::info!(profile_id = %profile.id, "created storage profile");
        Ok((profile, token))
    }

    pub fn get(&self, id: ProfileId) -> Result<Option<StorageProfile>, StoreError> {
        get_json(self.ds.as_ref(), &profile_key(id))
    }

    /// Resolve an auth token.
    pub fn by_token(&self, token: &str) -> Result<Option<ProfileId>, StoreError> {
        if token.is_empty() || token.contains('/') {
            return Ok(None);
        }
        get_json(self.ds.as_ref(), &auth_key(token))
    }

    pub fn list(&self) -> Result<Vec<StorageProfile>, StoreError> {
        let mut out: Vec<StorageProfile> = self
            .ds
            .scan_prefix(PROFILE_PREFIX)?
            .into_iter()
            .map(|(k, v)| decode(&k, &v))
            .collect::<Result<_, _>>()?;
        out.sort_by_key(|p| p.created_at);
        Ok(out)
    }

    /// Replace the profile's default config.
    pub fn set_default_config(
        &self,
        id: ProfileId,
        config: StorageConfig,
    ) -> Result<StorageProfile, StoreError> {
        self.update(id, |p| p.default_config = config)
    }

    /// Record a new owned address, optionally making it the default payer.
    pub fn add_addr(
        &self,
        id: ProfileId,
        addr: AddrInfo,
        make_default: bool,
    ) -> Result<StorageProfile, StoreError> {
        self.update(id, |p| {
            if make_default {
                p.default_config.cold.filecoin.addr = addr.addr.clone();
            }
            p.addrs.push(addr);
        })
    }

    fn update(
        &self,
        id: ProfileId,
        f: impl FnOnce(&mut StorageProfile),
    ) -> Result<StorageProfile, StoreError> {
        let _guard = self.write.lock();
        let mut profile = self
            .get(id)?
            .ok_or_else(|| StoreError::NotFound(format!("profile {id}")))?;
        f(&mut profile);
        put_json(self.ds.as_ref(), &profile_key(id), &profile)?;
        Ok(profile)
    }
}
