//! # RPC Wire Types
//!
//! Request and response bodies of the HTTP/JSON surface. The server
//! (`pow-api`) and the client (`pow-client`) both use these definitions.

use serde::{Deserialize, Serialize};

use crate::config::StorageConfig;
use crate::identity::{Cid, JobId, ProfileId};
use crate::info::CidInfo;
use crate::job::StorageJob;

// ─── Errors ──────────────────────────────────────────────────────────

/// Structured JSON error response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable code, one of the `ErrorKind` codes.
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

// ─── Data ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResponse {
    pub cid: Cid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageCidRequest {
    pub cid: Cid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaceRequest {
    pub cid1: Cid,
    pub cid2: Cid,
}

/// One file of a staged folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderEntry {
    /// Path relative to the folder root, `/`-separated.
    pub path: String,
    pub cid: Cid,
    pub size: u64,
}

/// Directory manifest staged as the folder's root object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderManifest {
    pub entries: Vec<FolderEntry>,
}

// ─── Storage config ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyRequest {
    pub cid: Cid,
    /// Falls back to the profile default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<StorageConfig>,
    #[serde(default, rename = "override")]
    pub override_config: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobIdResponse {
    pub job_id: JobId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveRequest {
    pub cid: Cid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigResponse {
    pub config: StorageConfig,
}

// ─── Jobs ────────────────────────────────────────────────────────────

/// Which jobs a listing returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListSelect {
    #[default]
    All,
    Queued,
    Executing,
    Final,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListJobsQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<Cid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(default)]
    pub ascending: bool,
    #[serde(default)]
    pub select: ListSelect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<StorageJob>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

// ─── Storage info ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageInfosResponse {
    pub infos: Vec<CidInfo>,
}

// ─── Deals ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DealRecordsFilter {
    /// Restrict to these wallet addresses; empty means all of the profile's.
    #[serde(default)]
    pub addrs: Vec<String>,
    #[serde(default)]
    pub cids: Vec<Cid>,
    #[serde(default)]
    pub include_pending: bool,
    #[serde(default = "default_true")]
    pub include_final: bool,
    #[serde(default)]
    pub ascending: bool,
}

fn default_true() -> bool {
    true
}

// ─── Wallet ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub addr: String,
    pub balance: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAddrRequest {
    pub name: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub addr_type: Option<String>,
    #[serde(default)]
    pub make_default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAddrResponse {
    pub addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendFilRequest {
    pub from: String,
    pub to: String,
    pub amount: u64,
}

/// Messages and signatures travel hex-encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignRequest {
    pub addr: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignResponse {
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub addr: String,
    pub message: String,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub valid: bool,
}

// ─── Admin ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProfileResponse {
    pub id: ProfileId,
    pub token: String,
}

/// Fleet-level address creation; the type defaults to `bls`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetNewAddrRequest {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub addr_type: Option<String>,
}
