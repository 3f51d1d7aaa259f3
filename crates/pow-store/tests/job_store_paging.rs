//! Paging and durability behavior of the job store over both backends.

use std::sync::Arc;

use pow_core::{Cid, Codec, JobId, JobStatus, ProfileId, StorageConfig, StorageJob};
use pow_store::{Datastore, JobQuery, JobStore, MemDatastore, RedbDatastore};
use proptest::prelude::*;

fn job(profile: ProfileId, n: usize) -> StorageJob {
    StorageJob::new(
        profile,
        Cid::for_content(Codec::Raw, &n.to_le_bytes()),
        StorageConfig::default(),
    )
}

fn page_through(store: &JobStore, profile: ProfileId, limit: usize, ascending: bool) -> Vec<JobId> {
    let mut query = JobQuery {
        profile_id: Some(profile),
        limit,
        ascending,
        ..JobQuery::default()
    };
    let mut seen = Vec::new();
    loop {
        let page = store.list(&query).unwrap();
        assert!(page.jobs.len() <= limit);
        seen.extend(page.jobs.iter().map(|j| j.id));
        match page.next_page_token {
            Some(token) => query.page_token = Some(token),
            None => return seen,
        }
    }
}

proptest! {
    #[test]
    fn paging_visits_every_job_once_in_order(count in 0usize..25, limit in 1usize..7, ascending: bool) {
        let store = JobStore::open(Arc::new(MemDatastore::new())).unwrap();
        let profile = ProfileId::new();
        let mut ids: Vec<JobId> = (0..count).map(|n| store.enqueue(job(profile, n)).unwrap().id).collect();
        if !ascending {
            ids.reverse();
        }
        prop_assert_eq!(page_through(&store, profile, limit, ascending), ids);
    }
}

// -- Durability ---------------------------------------------------------------

#[test]
fn test_redb_jobs_survive_restart_and_are_requeued() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("jobs.redb");
    let profile = ProfileId::new();

    let (done_id, running_id, queued_id) = {
        let ds: Arc<dyn Datastore> = Arc::new(RedbDatastore::open(&path).unwrap());
        let store = JobStore::open(ds).unwrap();
        let done = store.enqueue(job(profile, 1)).unwrap();
        let running = store.enqueue(job(profile, 2)).unwrap();
        let queued = store.enqueue(job(profile, 3)).unwrap();
        store.dequeue(None, |_, id| id == done.id).unwrap();
        store
            .finish(done.id, JobStatus::Success, None, vec![], vec![])
            .unwrap();
        store.dequeue(None, |_, id| id == running.id).unwrap();
        (done.id, running.id, queued.id)
    };

    let ds: Arc<dyn Datastore> = Arc::new(RedbDatastore::open(&path).unwrap());
    let store = JobStore::open(ds).unwrap();
    assert_eq!(store.recover_orphaned().unwrap(), vec![running_id]);
    assert_eq!(
        store.get(done_id).unwrap().unwrap().status,
        JobStatus::Success
    );

    // Oldest first: the re-queued job was created before the queued one.
    let first = store.dequeue(None, |_, _| true).unwrap().unwrap();
    assert_eq!(first.job.id, running_id);
    let second = store.dequeue(None, |_, _| true).unwrap().unwrap();
    assert_eq!(second.job.id, queued_id);
}

#[test]
fn test_created_at_order_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("order.redb");
    let profile = ProfileId::new();
    let first = {
        let store = JobStore::open(Arc::new(RedbDatastore::open(&path).unwrap())).unwrap();
        store.enqueue(job(profile, 1)).unwrap()
    };
    let store = JobStore::open(Arc::new(RedbDatastore::open(&path).unwrap())).unwrap();
    let mut older = job(profile, 2);
    older.created_at = first.created_at;
    let second = store.enqueue(older).unwrap();
    assert!(second.created_at > first.created_at);
}
