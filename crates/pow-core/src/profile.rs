//! Storage profiles: tenants with their own wallets and default config.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::StorageConfig;
use crate::identity::ProfileId;

/// A wallet address owned by a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddrInfo {
    pub name: String,
    pub addr: String,
    #[serde(rename = "type")]
    pub addr_type: String,
}

/// A tenant container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageProfile {
    pub id: ProfileId,
    pub created_at: DateTime<Utc>,
    pub addrs: Vec<AddrInfo>,
    pub default_config: StorageConfig,
}

impl StorageProfile {
    /// Whether `addr` belongs to this profile.
    pub fn owns_addr(&self, addr: &str) -> bool {
        self.addrs.iter().any(|a| a.addr == addr)
    }

    /// All owned addresses.
    pub fn addr_list(&self) -> Vec<String> {
        self.addrs.iter().map(|a| a.addr.clone()).collect()
    }
}
