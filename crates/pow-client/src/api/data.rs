//! Staging, retrieval, logs and cid info.

use bytes::Bytes;
use pow_core::rpc::{JobIdResponse, ReplaceRequest, StageCidRequest, StageResponse};
use pow_core::{Cid, CidInfo, Codec, JobId, LogEntry};
use reqwest::Method;
use serde::Serialize;

use crate::client::{Auth, PowClient};
use crate::error::ClientError;
use crate::stream::ItemStream;

/// Options for [`PowClient::watch_logs`].
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LogsOptions {
    /// Only entries produced by this job.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    /// Replay stored entries before following new ones.
    pub history: bool,
}

impl PowClient {
    /// Stage `data` in the hot tier without pinning it.
    pub async fn stage(&self, data: impl Into<Bytes>) -> Result<Cid, ClientError> {
        self.stage_with_codec(data.into(), Codec::Raw).await
    }

    pub async fn stage_with_codec(&self, data: Bytes, codec: Codec) -> Result<Cid, ClientError> {
        self.upload("v1/data/stage", Auth::User, data, codec).await
    }

    /// Add data through the IPFS-compatible endpoint.
    pub async fn ipfs_add(&self, data: Bytes, codec: Codec) -> Result<Cid, ClientError> {
        self.upload("ipfs/add", Auth::Ipfs, data, codec).await
    }

    async fn upload(
        &self,
        path: &str,
        auth: Auth,
        data: Bytes,
        codec: Codec,
    ) -> Result<Cid, ClientError> {
        let query = [("codec", codec.as_str())];
        let (endpoint, resp) = self
            .call(Method::POST, path, auth, |r| {
                r.query(&query)
                    .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                    .body(data.clone())
            })
            .await?;
        let staged: StageResponse = resp
            .json()
            .await
            .map_err(|source| ClientError::Deserialization { endpoint, source })?;
        Ok(staged.cid)
    }

    /// Pin a cid the hot tier can already find.
    pub async fn stage_cid(&self, cid: &Cid) -> Result<(), ClientError> {
        let req = StageCidRequest { cid: cid.clone() };
        self.send_unit(Method::POST, "v1/data/stage-cid", &req, Auth::User)
            .await
    }

    /// Move the config of `cid1` to `cid2` and start a job for `cid2`.
    pub async fn replace(&self, cid1: &Cid, cid2: &Cid) -> Result<JobId, ClientError> {
        let req = ReplaceRequest {
            cid1: cid1.clone(),
            cid2: cid2.clone(),
        };
        let resp: JobIdResponse = self
            .send_json(Method::POST, "v1/data/replace", &req, Auth::User)
            .await?;
        Ok(resp.job_id)
    }

    /// Retrieve the bytes of `cid`.
    pub async fn get(&self, cid: &Cid) -> Result<Bytes, ClientError> {
        let (endpoint, resp) = self
            .call(Method::GET, &format!("v1/data/{cid}"), Auth::User, |r| r)
            .await?;
        resp.bytes()
            .await
            .map_err(|source| ClientError::Http { endpoint, source })
    }

    /// Follow log entries for `cid`.
    pub async fn watch_logs(
        &self,
        cid: &Cid,
        opts: LogsOptions,
    ) -> Result<ItemStream<LogEntry>, ClientError> {
        self.stream(&format!("v1/data/{cid}/logs"), &opts).await
    }

    pub async fn cid_info(&self, cid: &Cid) -> Result<CidInfo, ClientError> {
        self.get_json(&format!("v1/data/{cid}/info"), Auth::User)
            .await
    }
}
