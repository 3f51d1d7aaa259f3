//! # Engine Properties
//!
//! Behaviors that must hold for any job flow, checked over devnet
//! back-ends: watch ordering, one live job per cid, idempotent reapply,
//! data round-trips, restart durability over redb, and the removal
//! precondition.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::{devnet, engine_config, miners, Node, TIMEOUT};
use pow_core::{Cid, Codec, ErrorKind, JobId, JobStatus};
use pow_devnet::{MinerBehavior, MinerSpec};
use pow_engine::Powergate;
use pow_store::{RedbDatastore, Stores};

// ── Watch ordering ───────────────────────────────────────────────────

#[tokio::test]
async fn watched_statuses_never_move_backwards() {
    let node = Node::start(miners(&["f01000", "f01001"])).await;
    let mut watch = node.pow.watch_jobs(node.profile, Vec::new());

    let mut ids = Vec::new();
    for payload in [&b"one"[..], b"two", b"three"] {
        let cid = node.stage(payload).await;
        ids.push(node.apply(&cid, None, false).await);
    }

    let mut seen: HashMap<JobId, Vec<JobStatus>> = HashMap::new();
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while seen
        .values()
        .filter(|s| s.last().is_some_and(JobStatus::is_terminal))
        .count()
        < ids.len()
    {
        let job = tokio::time::timeout_at(deadline, watch.recv())
            .await
            .expect("watch timed out")
            .expect("watch closed");
        seen.entry(job.id).or_default().push(job.status);
    }

    for id in &ids {
        let statuses = &seen[id];
        assert!(
            statuses.windows(2).all(|w| w[0].rank() <= w[1].rank()),
            "job {id} went backwards: {statuses:?}"
        );
        assert_eq!(statuses.iter().filter(|s| s.is_terminal()).count(), 1);
        assert_eq!(statuses.last(), Some(&JobStatus::Success));
    }
    node.stop().await;
}

// ── Single flight ────────────────────────────────────────────────────

#[tokio::test]
async fn one_live_job_per_cid() {
    let node = Node::start(vec![
        MinerSpec::new("f01000").with_behavior(MinerBehavior::Stall)
    ])
    .await;
    let cid = node.stage(b"contended").await;
    let live = |node: &Node, cid: &Cid| {
        let summary = node.pow.summary(node.profile, std::slice::from_ref(cid)).unwrap();
        summary.queued_n + summary.executing_n
    };

    let first = node.apply(&cid, None, false).await;
    node.wait_status(first, JobStatus::Executing).await;
    assert_eq!(live(&node, &cid), 1);

    let second = node.apply(&cid, Some(node.config()), true).await;
    assert_eq!(node.pow.job(node.profile, first).unwrap().status, JobStatus::Canceled);
    assert!(live(&node, &cid) <= 1);

    node.devnet.cold.set_behavior("f01000", MinerBehavior::Activate);
    let job = node.terminal(second).await;
    assert_eq!(job.status, JobStatus::Success, "{:?}", job.error_cause);
    assert_eq!(live(&node, &cid), 0);
    node.stop().await;
}

#[tokio::test]
async fn concurrent_applies_keep_single_flight() {
    let node = Arc::new(Node::start(miners(&["f01000"])).await);
    let cid = node.stage(b"racing applies").await;
    node.terminal(node.apply(&cid, None, false).await).await;

    let mut handles = Vec::new();
    for _ in 0..4 {
        let node = Arc::clone(&node);
        let cid = cid.clone();
        handles.push(tokio::spawn(async move {
            node.apply(&cid, Some(node.config()), true).await
        }));
    }
    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap());
    }
    assert!(node.pow.scheduler().wait_terminal(&ids, TIMEOUT).await.unwrap());
    let successes = ids
        .iter()
        .filter(|id| node.pow.job(node.profile, **id).unwrap().status == JobStatus::Success)
        .count();
    assert!(successes >= 1);
    let summary = node.pow.summary(node.profile, &[cid]).unwrap();
    assert_eq!(summary.queued_n + summary.executing_n, 0);
    node.stop().await;
}

// ── Idempotent reapply ───────────────────────────────────────────────

#[tokio::test]
async fn reapplying_satisfied_config_makes_no_new_deals() {
    let node = Node::start(miners(&["f01000", "f01001"])).await;
    let cid = node.stage(b"already stored").await;
    let cfg = node.config();

    let first = node.terminal(node.apply(&cid, Some(cfg.clone()), false).await).await;
    assert_eq!(first.status, JobStatus::Success);
    let proposals = node.devnet.cold.proposal_count();
    let before = node.pow.storage_info(node.profile, &cid).unwrap();

    let again = node.terminal(node.apply(&cid, Some(cfg), true).await).await;
    assert_eq!(again.status, JobStatus::Success, "{:?}", again.error_cause);
    assert_eq!(node.devnet.cold.proposal_count(), proposals);

    let after = node.pow.storage_info(node.profile, &cid).unwrap();
    assert_eq!(after.job_id, again.id);
    assert_eq!(after.cold.filecoin.proposals, before.cold.filecoin.proposals);
    node.stop().await;
}

// ── Round trip ───────────────────────────────────────────────────────

#[tokio::test]
async fn staged_bytes_come_back_unchanged() {
    let node = Node::start(miners(&["f01000"])).await;
    let large: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let cases: Vec<(Codec, Vec<u8>)> = vec![
        (Codec::Raw, b"x".to_vec()),
        (Codec::Raw, large),
        (Codec::DagJson, br#"{"entries":[]}"#.to_vec()),
    ];

    for (codec, data) in cases {
        let cid = node
            .pow
            .stage(node.profile, Bytes::from(data.clone()), codec)
            .await
            .unwrap();
        assert_eq!(cid, Cid::for_content(codec, &data));
        let job = node.terminal(node.apply(&cid, None, false).await).await;
        assert_eq!(job.status, JobStatus::Success, "{:?}", job.error_cause);
        let got = node.pow.get_data(node.profile, &cid).await.unwrap();
        assert_eq!(got.len(), data.len());
        assert!(got[..] == data[..]);
    }
    node.stop().await;
}

#[tokio::test]
async fn cold_copy_survives_hot_eviction() {
    let node = Node::start(miners(&["f01000"])).await;
    let cid = node.stage(b"frozen").await;
    let job = node.terminal(node.apply(&cid, None, false).await).await;
    assert_eq!(job.status, JobStatus::Success);

    let mut cfg = node.config().with_hot_enabled(false);
    node.terminal(node.apply(&cid, Some(cfg.clone()), true).await).await;
    let err = node.pow.get_data(node.profile, &cid).await.unwrap_err();
    assert!(err.is(ErrorKind::NotFound), "{err}");
    node.devnet.hot.evict(&cid);

    cfg.hot.enabled = true;
    cfg.hot.allow_unfreeze = true;
    cfg.hot.unfreeze_max_price = u64::MAX;
    cfg.hot.ipfs.add_timeout_s = 1;
    let thawed = node.terminal(node.apply(&cid, Some(cfg), true).await).await;
    assert_eq!(thawed.status, JobStatus::Success, "{:?}", thawed.error_cause);
    let got = node.pow.get_data(node.profile, &cid).await.unwrap();
    assert_eq!(&got[..], b"frozen");
    node.stop().await;
}

// ── Restart durability ───────────────────────────────────────────────

/// Reopen a redb file whose previous handle may still be closing.
async fn reopen(path: &std::path::Path) -> Stores {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        match RedbDatastore::open(path) {
            Ok(ds) => return Stores::open(Arc::new(ds)).unwrap(),
            Err(e) => {
                assert!(tokio::time::Instant::now() < deadline, "reopen failed: {e}");
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
    }
}

#[tokio::test]
async fn executing_job_resumes_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pow.redb");
    let net = devnet(vec![
        MinerSpec::new("f01000").with_behavior(MinerBehavior::Stall)
    ]);
    let chain = net.spawn();

    let (profile, cid, id) = {
        let stores = reopen(&path).await;
        let pow = Powergate::new(stores, net.capabilities(), engine_config());
        pow.start().unwrap();
        let (profile, _) = pow.create_profile().await.unwrap();
        let cid = pow
            .stage(profile.id, Bytes::from_static(b"survives restarts"), Codec::Raw)
            .await
            .unwrap();
        let id = pow.apply(profile.id, cid.clone(), None, false).await.unwrap();
        let deadline = tokio::time::Instant::now() + TIMEOUT;
        while pow.stores().deals.get_started(profile.id, &cid).unwrap().is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "no deal started");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        pow.shutdown(Duration::from_millis(50)).await;
        assert_eq!(pow.job(profile.id, id).unwrap().status, JobStatus::Executing);
        (profile.id, cid, id)
    };

    net.cold.set_behavior("f01000", MinerBehavior::Activate);
    let stores = reopen(&path).await;
    assert_eq!(
        stores.jobs.get(id).unwrap().map(|j| j.status),
        Some(JobStatus::Executing)
    );
    let pow = Powergate::new(stores, net.capabilities(), engine_config());
    pow.start().unwrap();
    assert!(pow.scheduler().wait_terminal(&[id], TIMEOUT).await.unwrap());

    let job = pow.job(profile, id).unwrap();
    assert_eq!(job.status, JobStatus::Success, "{:?}", job.error_cause);
    assert_eq!(net.cold.proposal_count(), 1);
    assert!(pow.profile(profile).is_ok());
    assert_eq!(pow.storage_info(profile, &cid).unwrap().job_id, id);
    pow.shutdown(Duration::from_millis(200)).await;
    for task in chain {
        task.abort();
    }
}

// ── Removal ──────────────────────────────────────────────────────────

#[tokio::test]
async fn remove_requires_disabled_config() {
    let node = Node::start(miners(&["f01000"])).await;
    let never = node.stage(b"never applied").await;
    let err = node.pow.remove(node.profile, &never).unwrap_err();
    assert!(err.is(ErrorKind::NotFound), "{err}");

    let cid = node.stage(b"stored").await;
    node.terminal(node.apply(&cid, None, false).await).await;
    let err = node.pow.remove(node.profile, &cid).unwrap_err();
    assert!(err.is(ErrorKind::ActiveInStorage), "{err}");

    let disabled = node.config().disabled();
    let job = node.terminal(node.apply(&cid, Some(disabled), true).await).await;
    assert_eq!(job.status, JobStatus::Success, "{:?}", job.error_cause);
    node.pow.remove(node.profile, &cid).unwrap();

    let err = node.pow.storage_info(node.profile, &cid).unwrap_err();
    assert!(err.is(ErrorKind::NotFound), "{err}");
    let err = node.pow.get_data(node.profile, &cid).await.unwrap_err();
    assert!(err.is(ErrorKind::NotFound), "{err}");
    node.stop().await;
}
