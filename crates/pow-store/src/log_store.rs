//! # Cid Log
//!
//! Append-only, human-readable log per `(profile, cid)`, retained across
//! job boundaries and fanned out to live subscribers.
//!
//! ```text
//! logs/<profile_id>/<cid>/<ts_ns> -> LogEntry
//! ```

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use pow_core::{Cid, JobId, LogEntry, ProfileId};
use tokio::sync::mpsc;

use crate::error::StoreError;
use crate::kv::{decode, put_json, ts_key, Datastore};

/// Per-subscriber buffer of log entries.
pub const LOG_WATCH_BUFFER: usize = 128;

const LOGS_PREFIX: &str = "logs/";

struct LogSubscriber {
    profile_id: ProfileId,
    cid: Cid,
    tx: mpsc::Sender<LogEntry>,
}

struct LogState {
    last_ns: i64,
    subscribers: Vec<LogSubscriber>,
}

/// Persisted cid log with live fan-out.
pub struct CidLogStore {
    ds: Arc<dyn Datastore>,
    state: Mutex<LogState>,
}

impl std::fmt::Debug for CidLogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CidLogStore").finish_non_exhaustive()
    }
}

impl CidLogStore {
    pub fn new(ds: Arc<dyn Datastore>) -> Self {
        Self {
            ds,
            state: Mutex::new(LogState {
                last_ns: 0,
                subscribers: Vec::new(),
            }),
        }
    }

    /// Append a message to the cid's log.
    pub fn log(
        &self,
        profile: ProfileId,
        cid: &Cid,
        job_id: Option<JobId>,
        msg: impl Into<String>,
    ) -> Result<LogEntry, StoreError> {
        let mut state = self.state.lock();
        let now = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
        let ns = now.max(state.last_ns + 1);
        state.last_ns = ns;
        let entry = LogEntry {
            cid: cid.clone(),
            job_id,
            timestamp: Utc.timestamp_nanos(ns),
            msg: msg.into(),
        };
        let key = format!("{LOGS_PREFIX}{profile}/{cid}/{}", ts_key(ns));
        put_json(self.ds.as_ref(), &key, &entry)?;
        state.subscribers.retain(|sub| {
            if sub.profile_id != profile || sub.cid != *cid {
                return !sub.tx.is_closed();
            }
            match sub.tx.try_send(entry.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    metrics::counter!("pow_cid_log_events_dropped_total").increment(1);
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
        Ok(entry)
    }

    /// Stored entries in timestamp order.
    pub fn get(&self, profile: ProfileId, cid: &Cid) -> Result<Vec<LogEntry>, StoreError> {
        self.ds
            .scan_prefix(&format!("{LOGS_PREFIX}{profile}/{cid}/"))?
            .into_iter()
            .map(|(k, v)| decode(&k, &v))
            .collect()
    }

    /// Subscribe to new entries of one cid.
    pub fn watch(&self, profile: ProfileId, cid: &Cid) -> mpsc::Receiver<LogEntry> {
        let (tx, rx) = mpsc::channel(LOG_WATCH_BUFFER);
        self.state.lock().subscribers.push(LogSubscriber {
            profile_id: profile,
            cid: cid.clone(),
            tx,
        });
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemDatastore;
    use pow_core::Codec;

    #[test]
    fn entries_are_ordered_and_scoped() {
        let s = CidLogStore::new(Arc::new(MemDatastore::new()));
        let p = ProfileId::new();
        let c = Cid::for_content(Codec::Raw, b"log");
        let other = Cid::for_content(Codec::Raw, b"other");
        s.log(p, &c, None, "first").unwrap();
        s.log(p, &other, None, "elsewhere").unwrap();
        s.log(p, &c, Some(JobId::new()), "second").unwrap();
        let msgs: Vec<String> = s.get(p, &c).unwrap().into_iter().map(|e| e.msg).collect();
        assert_eq!(msgs, vec!["first".to_string(), "second".to_string()]);
        assert!(s.get(ProfileId::new(), &c).unwrap().is_empty());
    }

    #[tokio::test]
    async fn watch_receives_new_entries() {
        let s = CidLogStore::new(Arc::new(MemDatastore::new()));
        let p = ProfileId::new();
        let c = Cid::for_content(Codec::Raw, b"w");
        let mut rx = s.watch(p, &c);
        s.log(p, &Cid::for_content(Codec::Raw, b"x"), None, "skip").unwrap();
        s.log(p, &c, None, "hello").unwrap();
        assert_eq!(rx.recv().await.unwrap().msg, "hello");
    }
}
