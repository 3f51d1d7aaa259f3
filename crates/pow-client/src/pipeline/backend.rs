//! The server calls the pipeline makes, behind a trait so runs can be
//! driven against something other than a live server.

use std::path::Path;

use async_trait::async_trait;
use pow_core::{Cid, JobId, JobsSummary, StorageConfig};

use crate::api::storage::ApplyOptions;
use crate::client::PowClient;
use crate::error::ClientError;

#[async_trait]
pub trait PipelineBackend: Send + Sync + 'static {
    /// Stage a file or folder, returning its cid.
    async fn stage(&self, path: &Path, is_dir: bool) -> Result<Cid, ClientError>;

    /// Apply `config` (or the profile default) with override set.
    async fn apply(&self, cid: &Cid, config: Option<StorageConfig>) -> Result<JobId, ClientError>;

    async fn default_config(&self) -> Result<StorageConfig, ClientError>;

    async fn summary(&self, cids: &[Cid]) -> Result<JobsSummary, ClientError>;
}

#[async_trait]
impl PipelineBackend for PowClient {
    async fn stage(&self, path: &Path, is_dir: bool) -> Result<Cid, ClientError> {
        if is_dir {
            self.stage_folder(path).await
        } else {
            self.stage_file(path).await
        }
    }

    async fn apply(&self, cid: &Cid, config: Option<StorageConfig>) -> Result<JobId, ClientError> {
        let opts = ApplyOptions {
            config,
            override_config: true,
        };
        PowClient::apply(self, cid, opts).await
    }

    async fn default_config(&self) -> Result<StorageConfig, ClientError> {
        PowClient::default_config(self).await
    }

    async fn summary(&self, cids: &[Cid]) -> Result<JobsSummary, ClientError> {
        self.jobs_summary(cids).await
    }
}
