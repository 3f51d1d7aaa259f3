//! Deal bookkeeping: in-flight proposals for crash recovery, and the
//! storage/retrieval deal history served to clients.
//!
//! ```text
//! started/<profile_id>/<cid>                    -> [DealHandle]
//! deals/storage/<addr>/<proposal_cid>           -> StorageDealRecord
//! deals/retrieval/<addr>/<ts_ns>                -> RetrievalDealRecord
//! ```

use std::sync::Arc;

use pow_core::rpc::DealRecordsFilter;
use pow_core::{Cid, DealHandle, ProfileId, RetrievalDealRecord, StorageDealRecord};

use crate::error::StoreError;
use crate::kv::{decode, get_json, put_json, ts_key, Datastore};

fn started_key(profile: ProfileId, cid: &Cid) -> String {
    format!("started/{profile}/{cid}")
}

/// Deal records and started-deal checkpoints.
pub struct DealStore {
    ds: Arc<dyn Datastore>,
}

impl std::fmt::Debug for DealStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DealStore").finish_non_exhaustive()
    }
}

impl DealStore {
    pub fn new(ds: Arc<dyn Datastore>) -> Self {
        Self { ds }
    }

    // ── Started deals ───────────────────────────────────────────────

    /// Record proposals that are in flight for a cid.
    pub fn put_started(
        &self,
        profile: ProfileId,
        cid: &Cid,
        handles: &[DealHandle],
    ) -> Result<(), StoreError> {
        put_json(self.ds.as_ref(), &started_key(profile, cid), &handles)
    }

    pub fn get_started(&self, profile: ProfileId, cid: &Cid) -> Result<Vec<DealHandle>, StoreError> {
        Ok(get_json(self.ds.as_ref(), &started_key(profile, cid))?.unwrap_or_default())
    }

    pub fn clear_started(&self, profile: ProfileId, cid: &Cid) -> Result<(), StoreError> {
        self.ds.delete(&started_key(profile, cid))
    }

    // ── History ─────────────────────────────────────────────────────

    /// Insert or replace the record of a storage deal.
    pub fn put_storage_record(&self, record: &StorageDealRecord) -> Result<(), StoreError> {
        let key = format!(
            "deals/storage/{}/{}",
            record.addr, record.deal_info.proposal_cid
        );
        put_json(self.ds.as_ref(), &key, record)
    }

    pub fn put_retrieval_record(&self, record: &RetrievalDealRecord) -> Result<(), StoreError> {
        let ns = record.time.timestamp_nanos_opt().unwrap_or(i64::MAX);
        let key = format!("deals/retrieval/{}/{}", record.addr, ts_key(ns));
        put_json(self.ds.as_ref(), &key, record)
    }

    /// Storage deal records of `addrs` matching `filter`.
    pub fn storage_records(
        &self,
        addrs: &[String],
        filter: &DealRecordsFilter,
    ) -> Result<Vec<StorageDealRecord>, StoreError> {
        let mut out = Vec::new();
        for addr in addrs {
            for (k, v) in self.ds.scan_prefix(&format!("deals/storage/{addr}/"))? {
                let record: StorageDealRecord = decode(&k, &v)?;
                let wanted = if record.pending {
                    filter.include_pending
                } else {
                    filter.include_final
                };
                if wanted && (filter.cids.is_empty() || filter.cids.contains(&record.root_cid)) {
                    out.push(record);
                }
            }
        }
        out.sort_by_key(|r| r.time);
        if !filter.ascending {
            out.reverse();
        }
        Ok(out)
    }

    /// Retrieval records of `addrs` matching `filter`.
    pub fn retrieval_records(
        &self,
        addrs: &[String],
        filter: &DealRecordsFilter,
    ) -> Result<Vec<RetrievalDealRecord>, StoreError> {
        let mut out = Vec::new();
        for addr in addrs {
            for (k, v) in self.ds.scan_prefix(&format!("deals/retrieval/{addr}/"))? {
                let record: RetrievalDealRecord = decode(&k, &v)?;
                if filter.cids.is_empty() || filter.cids.contains(&record.root_cid) {
                    out.push(record);
                }
            }
        }
        out.sort_by_key(|r| r.time);
        if !filter.ascending {
            out.reverse();
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemDatastore;
    use chrono::{Duration, Utc};
    use pow_core::{Codec, DealInfo, DealState};

    fn deal_info(proposal: &str, state: DealState) -> DealInfo {
        DealInfo {
            proposal_cid: proposal.into(),
            state,
            miner: "f01000".into(),
            piece_cid: "piece".into(),
            size: 256,
            price_per_epoch: 1,
            start_epoch: 10,
            duration: 100,
            deal_id: None,
            activation_epoch: 0,
            message: None,
        }
    }

    #[test]
    fn started_round_trip_and_clear() {
        let s = DealStore::new(Arc::new(MemDatastore::new()));
        let p = ProfileId::new();
        let cid = Cid::for_content(Codec::Raw, b"s");
        assert!(s.get_started(p, &cid).unwrap().is_empty());
        let handle = DealHandle {
            proposal_cid: "prop".into(),
            miner: "f01".into(),
            cid: cid.clone(),
            wallet: "f1w".into(),
            epoch_price: 1,
            duration: 10,
            start_epoch: 0,
            size: 256,
            renewal: false,
        };
        s.put_started(p, &cid, &[handle.clone()]).unwrap();
        assert_eq!(s.get_started(p, &cid).unwrap(), vec![handle]);
        s.clear_started(p, &cid).unwrap();
        assert!(s.get_started(p, &cid).unwrap().is_empty());
    }

    #[test]
    fn storage_records_replace_pending_and_filter() {
        let s = DealStore::new(Arc::new(MemDatastore::new()));
        let cid = Cid::for_content(Codec::Raw, b"d");
        let now = Utc::now();
        s.put_storage_record(&StorageDealRecord {
            root_cid: cid.clone(),
            addr: "f1a".into(),
            time: now,
            pending: true,
            deal_info: deal_info("p1", DealState::Proposing),
        })
        .unwrap();
        s.put_storage_record(&StorageDealRecord {
            root_cid: cid.clone(),
            addr: "f1a".into(),
            time: now + Duration::seconds(1),
            pending: true,
            deal_info: deal_info("p2", DealState::Proposing),
        })
        .unwrap();
        s.put_storage_record(&StorageDealRecord {
            root_cid: cid.clone(),
            addr: "f1a".into(),
            time: now + Duration::seconds(2),
            pending: false,
            deal_info: deal_info("p1", DealState::Active),
        })
        .unwrap();

        let addrs = vec!["f1a".to_string()];
        let finals = s
            .storage_records(&addrs, &DealRecordsFilter {
                include_final: true,
                ..DealRecordsFilter::default()
            })
            .unwrap();
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].deal_info.state, DealState::Active);

        let all = s
            .storage_records(&addrs, &DealRecordsFilter {
                include_final: true,
                include_pending: true,
                ascending: true,
                ..DealRecordsFilter::default()
            })
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].deal_info.proposal_cid, "p2");

        let other = s
            .storage_records(&["f1other".to_string()], &DealRecordsFilter::default())
            .unwrap();
        assert!(other.is_empty());
    }

    #[test]
    fn retrieval_records_filter_by_cid() {
        let s = DealStore::new(Arc::new(MemDatastore::new()));
        let a = Cid::for_content(Codec::Raw, b"a");
        let b = Cid::for_content(Codec::Raw, b"b");
        for (i, cid) in [a.clone(), b].into_iter().enumerate() {
            s.put_retrieval_record(&RetrievalDealRecord {
                addr: "f1a".into(),
                root_cid: cid,
                miner: "f01".into(),
                size: 10,
                price: 5,
                time: Utc::now() + Duration::seconds(i as i64),
            })
            .unwrap();
        }
        let only_a = s
            .retrieval_records(&["f1a".to_string()], &DealRecordsFilter {
                cids: vec![a],
                ..DealRecordsFilter::default()
            })
            .unwrap();
        assert_eq!(only_a.len(), 1);
    }
}
