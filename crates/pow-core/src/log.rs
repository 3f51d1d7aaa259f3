//! Per-cid human-readable log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::{Cid, JobId};

/// One line of a cid's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub cid: Cid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    pub timestamp: DateTime<Utc>,
    pub msg: String,
}
