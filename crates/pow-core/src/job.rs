//! # Storage Jobs
//!
//! A [`StorageJob`] is one reconciliation attempt for a `(profile, cid)`.
//!
//! ## States
//!
//! ```text
//! QUEUED ──▶ EXECUTING ──▶ SUCCESS
//!   │            │
//!   │            ├──────▶ FAILED
//!   │            │
//!   └────────────┴──────▶ CANCELED
//! ```
//!
//! Terminal states are final. The one sanctioned back-edge is
//! `EXECUTING ──▶ QUEUED`, taken only by restart recovery through
//! [`StorageJob::requeue`], and it is recorded in the transition log like
//! any other move.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::StorageConfig;
use crate::deal::DealState;
use crate::error::StateError;
use crate::identity::{Cid, JobId, ProfileId};
use crate::ChainEpoch;

// ─── Status ──────────────────────────────────────────────────────────

/// Lifecycle status of a storage job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Unspecified,
    Queued,
    Executing,
    Failed,
    Canceled,
    Success,
}

impl JobStatus {
    /// Whether the status is final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Canceled | Self::Success)
    }

    /// Whether the lattice allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Unspecified, Self::Queued)
                | (Self::Queued, Self::Executing)
                | (Self::Queued, Self::Canceled)
                | (Self::Executing, Self::Success)
                | (Self::Executing, Self::Failed)
                | (Self::Executing, Self::Canceled)
        )
    }

    /// Position in the lattice, used to check watch monotonicity.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Unspecified => 0,
            Self::Queued => 1,
            Self::Executing => 2,
            Self::Failed | Self::Canceled | Self::Success => 3,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unspecified => "UNSPECIFIED",
            Self::Queued => "QUEUED",
            Self::Executing => "EXECUTING",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
            Self::Success => "SUCCESS",
        };
        f.write_str(s)
    }
}

// ─── Progress records ────────────────────────────────────────────────

/// Progress of one deal proposal made by a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealInfo {
    pub proposal_cid: String,
    pub state: DealState,
    pub miner: String,
    pub piece_cid: String,
    pub size: u64,
    pub price_per_epoch: u64,
    pub start_epoch: ChainEpoch,
    pub duration: ChainEpoch,
    pub deal_id: Option<u64>,
    pub activation_epoch: ChainEpoch,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A proposal that failed, was rejected, or timed out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealError {
    pub proposal_cid: Option<String>,
    pub miner: String,
    pub message: String,
}

/// Record of a single status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTransition {
    pub from: JobStatus,
    pub to: JobStatus,
    pub at: DateTime<Utc>,
}

/// The single-flight key of a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub profile_id: ProfileId,
    pub cid: Cid,
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.profile_id, self.cid)
    }
}

// ─── Job ─────────────────────────────────────────────────────────────

/// One reconciliation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageJob {
    pub id: JobId,
    pub profile_id: ProfileId,
    pub cid: Cid,
    /// Snapshot of the config at enqueue time.
    pub config: StorageConfig,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_cause: Option<String>,
    #[serde(default)]
    pub deal_info: Vec<DealInfo>,
    #[serde(default)]
    pub deal_errors: Vec<DealError>,
    /// Created by the periodic reconciler.
    #[serde(default)]
    pub reconcile: bool,
    #[serde(default)]
    pub transitions: Vec<JobTransition>,
}

impl StorageJob {
    /// A new job in `QUEUED`.
    pub fn new(profile_id: ProfileId, cid: Cid, config: StorageConfig) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            profile_id,
            cid,
            config,
            status: JobStatus::Queued,
            created_at: now,
            error_cause: None,
            deal_info: Vec::new(),
            deal_errors: Vec::new(),
            reconcile: false,
            transitions: vec![JobTransition {
                from: JobStatus::Unspecified,
                to: JobStatus::Queued,
                at: now,
            }],
        }
    }

    /// Mark this job as reconciler-driven.
    pub fn reconciling(mut self) -> Self {
        self.reconcile = true;
        self
    }

    pub fn key(&self) -> JobKey {
        JobKey {
            profile_id: self.profile_id,
            cid: self.cid.clone(),
        }
    }

    /// `QUEUED ──▶ EXECUTING`.
    pub fn start(&mut self) -> Result<(), StateError> {
        self.do_transition(JobStatus::Executing)
    }

    /// Move to a terminal status, recording `cause` for failures.
    pub fn finish(&mut self, status: JobStatus, cause: Option<String>) -> Result<(), StateError> {
        if !status.is_terminal() {
            return Err(StateError::InvalidTransition {
                from: self.status.to_string(),
                to: status.to_string(),
                reason: "finish requires a terminal status".into(),
            });
        }
        self.do_transition(status)?;
        self.error_cause = cause;
        Ok(())
    }

    /// `EXECUTING ──▶ QUEUED` for restart recovery.
    pub fn requeue(&mut self) -> Result<(), StateError> {
        if self.status != JobStatus::Executing {
            return Err(StateError::InvalidTransition {
                from: self.status.to_string(),
                to: JobStatus::Queued.to_string(),
                reason: "only executing jobs are re-queued".into(),
            });
        }
        self.record(JobStatus::Queued);
        Ok(())
    }

    /// Timestamp of the last transition.
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.transitions
            .last()
            .map(|t| t.at)
            .unwrap_or(self.created_at)
    }

    fn do_transition(&mut self, to: JobStatus) -> Result<(), StateError> {
        if self.status.is_terminal() {
            return Err(StateError::AlreadyTerminal {
                id: self.id.to_string(),
                status: self.status.to_string(),
            });
        }
        if !self.status.can_transition_to(to) {
            return Err(StateError::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
                reason: "not allowed by the job lattice".into(),
            });
        }
        self.record(to);
        Ok(())
    }

    fn record(&mut self, to: JobStatus) {
        self.transitions.push(JobTransition {
            from: self.status,
            to,
            at: Utc::now(),
        });
        self.status = to;
    }
}

// ─── Summary ─────────────────────────────────────────────────────────

/// Aggregate view of jobs for a profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobsSummary {
    pub queued_n: usize,
    pub executing_n: usize,
    pub latest_final_n: usize,
    pub latest_successful_n: usize,
    pub queued: Vec<StorageJob>,
    pub executing: Vec<StorageJob>,
    /// Most recent terminal job per cid.
    pub latest_final: Vec<StorageJob>,
    /// Most recent successful job per cid.
    pub latest_successful: Vec<StorageJob>,
}

impl JobsSummary {
    pub fn new(
        queued: Vec<StorageJob>,
        executing: Vec<StorageJob>,
        latest_final: Vec<StorageJob>,
        latest_successful: Vec<StorageJob>,
    ) -> Self {
        Self {
            queued_n: queued.len(),
            executing_n: executing.len(),
            latest_final_n: latest_final.len(),
            latest_successful_n: latest_successful.len(),
            queued,
            executing,
            latest_final,
            latest_successful,
        }
    }
}
