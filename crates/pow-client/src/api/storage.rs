//! Storage configs, jobs and storage info.

use pow_core::rpc::{
    ApplyRequest, ConfigResponse, JobIdResponse, ListJobsQuery, ListJobsResponse, RemoveRequest,
    StorageInfosResponse,
};
use pow_core::{Cid, CidInfo, JobId, JobsSummary, StorageConfig, StorageJob};
use reqwest::Method;

use super::list_param;
use crate::client::{Auth, PowClient};
use crate::error::ClientError;
use crate::stream::ItemStream;

/// Options for [`PowClient::apply`].
#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    /// Config to apply; the profile default when absent.
    pub config: Option<StorageConfig>,
    /// Replace an existing config for the cid.
    pub override_config: bool,
}

impl ApplyOptions {
    pub fn with_config(mut self, config: StorageConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn overriding(mut self) -> Self {
        self.override_config = true;
        self
    }
}

impl PowClient {
    // -- Config ---------------------------------------------------------------

    /// Apply a storage config to `cid`, returning the created job.
    pub async fn apply(&self, cid: &Cid, opts: ApplyOptions) -> Result<JobId, ClientError> {
        let req = ApplyRequest {
            cid: cid.clone(),
            config: opts.config,
            override_config: opts.override_config,
        };
        let resp: JobIdResponse = self
            .send_json(Method::POST, "v1/storage-config/apply", &req, Auth::User)
            .await?;
        Ok(resp.job_id)
    }

    /// Forget the config of a cid whose storage is disabled.
    pub async fn remove(&self, cid: &Cid) -> Result<(), ClientError> {
        let req = RemoveRequest { cid: cid.clone() };
        self.send_unit(Method::POST, "v1/storage-config/remove", &req, Auth::User)
            .await
    }

    pub async fn default_config(&self) -> Result<StorageConfig, ClientError> {
        let resp: ConfigResponse = self
            .get_json("v1/storage-config/default", Auth::User)
            .await?;
        Ok(resp.config)
    }

    pub async fn set_default_config(&self, config: StorageConfig) -> Result<(), ClientError> {
        let req = ConfigResponse { config };
        self.send_unit(Method::PUT, "v1/storage-config/default", &req, Auth::User)
            .await
    }

    // -- Jobs -----------------------------------------------------------------

    pub async fn job(&self, id: JobId) -> Result<StorageJob, ClientError> {
        self.get_json(&format!("v1/storage-jobs/{id}"), Auth::User)
            .await
    }

    /// The config snapshot a job runs with.
    pub async fn job_config(&self, id: JobId) -> Result<StorageConfig, ClientError> {
        let resp: ConfigResponse = self
            .get_json(&format!("v1/storage-jobs/{id}/config"), Auth::User)
            .await?;
        Ok(resp.config)
    }

    pub async fn cancel_job(&self, id: JobId) -> Result<(), ClientError> {
        self.call(
            Method::POST,
            &format!("v1/storage-jobs/{id}/cancel"),
            Auth::User,
            |r| r,
        )
        .await?;
        Ok(())
    }

    pub async fn list_jobs(&self, query: &ListJobsQuery) -> Result<ListJobsResponse, ClientError> {
        self.get_query("v1/storage-jobs", query, Auth::User).await
    }

    /// Queued, executing and latest final jobs, optionally for some cids.
    pub async fn jobs_summary(&self, cids: &[Cid]) -> Result<JobsSummary, ClientError> {
        self.get_query(
            "v1/storage-jobs/summary",
            &list_param("cids", cids),
            Auth::User,
        )
        .await
    }

    /// Follow job updates. The stream ends once every listed job is final;
    /// with no ids it follows all of the profile's jobs.
    pub async fn watch_jobs(&self, ids: &[JobId]) -> Result<ItemStream<StorageJob>, ClientError> {
        self.stream("v1/storage-jobs/watch", &list_param("job_ids", ids))
            .await
    }

    // -- Storage info ---------------------------------------------------------

    pub async fn storage_info(&self, cid: &Cid) -> Result<CidInfo, ClientError> {
        self.get_json(&format!("v1/storage-info/{cid}"), Auth::User)
            .await
    }

    /// Storage info for `cids`, or for every stored cid when empty.
    pub async fn storage_infos(&self, cids: &[Cid]) -> Result<Vec<CidInfo>, ClientError> {
        let resp: StorageInfosResponse = self
            .get_query("v1/storage-info", &list_param("cids", cids), Auth::User)
            .await?;
        Ok(resp.infos)
    }
}
