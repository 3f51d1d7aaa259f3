//! Admin routes. Calls carry the admin token set with
//! [`PowClient::with_admin_token`].

use pow_core::rpc::{
    CreateProfileResponse, FleetNewAddrRequest, ListJobsQuery, ListJobsResponse, NewAddrResponse,
    StorageInfosResponse,
};
use pow_core::{Cid, CidInfo, StorageProfile};
use reqwest::Method;

use super::list_param;
use crate::client::{Auth, PowClient};
use crate::error::ClientError;

impl PowClient {
    /// Create a profile. The returned token authenticates user calls.
    pub async fn create_profile(&self) -> Result<CreateProfileResponse, ClientError> {
        let (endpoint, resp) = self
            .call(Method::POST, "v1/admin/profiles", Auth::Admin, |r| r)
            .await?;
        resp.json()
            .await
            .map_err(|source| ClientError::Deserialization { endpoint, source })
    }

    pub async fn profiles(&self) -> Result<Vec<StorageProfile>, ClientError> {
        self.get_json("v1/admin/profiles", Auth::Admin).await
    }

    /// Addresses of the fleet wallet.
    pub async fn fleet_addrs(&self) -> Result<Vec<String>, ClientError> {
        self.get_json("v1/admin/wallet/addrs", Auth::Admin).await
    }

    pub async fn fleet_new_addr(&self, addr_type: Option<String>) -> Result<String, ClientError> {
        let req = FleetNewAddrRequest { addr_type };
        let resp: NewAddrResponse = self
            .send_json(Method::POST, "v1/admin/wallet/addrs", &req, Auth::Admin)
            .await?;
        Ok(resp.addr)
    }

    /// Jobs across every profile.
    pub async fn admin_jobs(&self, query: &ListJobsQuery) -> Result<ListJobsResponse, ClientError> {
        self.get_query("v1/admin/storage-jobs", query, Auth::Admin)
            .await
    }

    pub async fn admin_storage_infos(&self, cids: &[Cid]) -> Result<Vec<CidInfo>, ClientError> {
        let resp: StorageInfosResponse = self
            .get_query(
                "v1/admin/storage-info",
                &list_param("cids", cids),
                Auth::Admin,
            )
            .await?;
        Ok(resp.infos)
    }
}
