//! # End-to-end Scenarios
//!
//! The engine over devnet back-ends, driven through the `Powergate` facade:
//!
//! | Scenario | Covers |
//! |---|---|
//! | stage, apply, get | hot and cold storage of one cid, logs, deal records |
//! | partial replication | `rep_factor` above the number of miners |
//! | cancel | canceling a job stuck waiting on a deal |
//! | renewal | reconciler sweep after the chain ages a deal |
//! | replace | moving a config from one cid to another |

mod common;

use std::time::Duration;

use common::{miners, Node};
use pow_core::rpc::DealRecordsFilter;
use pow_core::{ErrorKind, JobStatus};
use pow_devnet::{MinerBehavior, MinerSpec};
use pow_store::CancelOutcome;

#[tokio::test]
async fn stage_apply_get() {
    let node = Node::start(miners(&["f01000", "f01001"])).await;
    let data = b"hello powergate";
    let cid = node.stage(data).await;

    let id = node.apply(&cid, None, false).await;
    let job = node.terminal(id).await;
    assert_eq!(job.status, JobStatus::Success, "{:?}", job.error_cause);
    assert_eq!(job.deal_info.len(), 1);

    let info = node.pow.storage_info(node.profile, &cid).unwrap();
    assert_eq!(info.job_id, id);
    assert!(info.hot.enabled);
    assert!(info.cold.enabled);
    assert_eq!(info.cold.filecoin.proposals.len(), 1);
    assert_eq!(info.cold.filecoin.data_cid.as_ref(), Some(&cid));

    let got = node.pow.get_data(node.profile, &cid).await.unwrap();
    assert_eq!(&got[..], data);

    let logs = node.pow.logs(node.profile, &cid, Some(id)).unwrap();
    assert!(!logs.is_empty());
    assert!(logs.iter().all(|e| e.job_id == Some(id)));

    let filter = DealRecordsFilter {
        include_final: true,
        ..DealRecordsFilter::default()
    };
    let records = node.pow.storage_deal_records(node.profile, &filter).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].root_cid, cid);
    node.stop().await;
}

#[tokio::test]
async fn hot_only_config_makes_no_deals() {
    let node = Node::start(miners(&["f01000"])).await;
    let cid = node.stage(b"hot only").await;
    let cfg = node.config().with_cold_enabled(false);

    let job = node.terminal(node.apply(&cid, Some(cfg), false).await).await;
    assert_eq!(job.status, JobStatus::Success);
    assert_eq!(node.devnet.cold.proposal_count(), 0);
    let info = node.pow.storage_info(node.profile, &cid).unwrap();
    assert!(info.hot.enabled);
    assert!(info.cold.filecoin.proposals.is_empty());
    node.stop().await;
}

#[tokio::test]
async fn partial_cold_replication_fails_job() {
    let node = Node::start(miners(&["f01000"])).await;
    let cid = node.stage(b"wants two copies").await;
    let cfg = node.config().with_rep_factor(2);

    let job = node.terminal(node.apply(&cid, Some(cfg), false).await).await;
    assert_eq!(job.status, JobStatus::Failed);
    let cause = job.error_cause.unwrap_or_default();
    assert!(
        cause.starts_with(ErrorKind::PartialColdReplication.code()),
        "unexpected cause {cause}"
    );
    assert_eq!(job.deal_info.len(), 1);
    assert_eq!(job.deal_info[0].miner, "f01000");
    let err = node.pow.storage_info(node.profile, &cid).unwrap_err();
    assert!(err.is(ErrorKind::NotFound), "{err}");
    node.stop().await;
}

#[tokio::test]
async fn failing_miner_is_replaced() {
    let node = Node::start(vec![
        MinerSpec::new("f01000").with_behavior(MinerBehavior::Fail),
        MinerSpec::new("f01001"),
    ])
    .await;
    let cid = node.stage(b"first miner fails").await;
    let cfg = node.config().with_trusted_miners(vec!["f01000".into(), "f01001".into()]);

    let job = node.terminal(node.apply(&cid, Some(cfg), false).await).await;
    assert_eq!(job.status, JobStatus::Success, "{:?}", job.error_cause);
    let info = node.pow.storage_info(node.profile, &cid).unwrap();
    assert_eq!(info.miners(), vec!["f01001".to_string()]);
    assert_eq!(node.devnet.cold.proposals_to("f01000"), 1);
    node.stop().await;
}

#[tokio::test]
async fn cancel_job_waiting_on_deal() {
    let node = Node::start(vec![
        MinerSpec::new("f01000").with_behavior(MinerBehavior::Stall)
    ])
    .await;
    let cid = node.stage(b"never sealed").await;
    let id = node.apply(&cid, None, false).await;
    node.wait_status(id, JobStatus::Executing).await;

    let outcome = node.pow.cancel_job(node.profile, id).unwrap();
    assert_eq!(outcome, CancelOutcome::Signaled);
    let job = node.terminal(id).await;
    assert_eq!(job.status, JobStatus::Canceled);

    let again = node.pow.cancel_job(node.profile, id).unwrap();
    assert_eq!(again, CancelOutcome::AlreadyFinal);
    node.stop().await;
}

#[tokio::test]
async fn reconciler_renews_expiring_deal() {
    let node = Node::start(miners(&["f01000"])).await;
    let cid = node.stage(b"renew me").await;
    let cfg = node.config().with_renew(1_000);

    let job = node.terminal(node.apply(&cid, Some(cfg), false).await).await;
    assert_eq!(job.status, JobStatus::Success, "{:?}", job.error_cause);
    let deal = node.pow.storage_info(node.profile, &cid).unwrap().cold.filecoin.proposals[0].clone();
    assert!(!deal.renewed);

    let idle = node.pow.reconciler().run_once().await.unwrap();
    assert_eq!(idle.scanned, 1);
    assert!(idle.enqueued.is_empty());

    node.devnet.cold.set_height(deal.end_epoch() - 500);
    let report = node.pow.reconciler().run_once().await.unwrap();
    assert_eq!(report.enqueued.len(), 1);

    let renewal = node.terminal(report.enqueued[0]).await;
    assert_eq!(renewal.status, JobStatus::Success, "{:?}", renewal.error_cause);
    assert!(renewal.reconcile);
    let info = node.pow.storage_info(node.profile, &cid).unwrap();
    assert!(info
        .cold
        .filecoin
        .proposals
        .iter()
        .any(|d| d.renewed && d.miner == deal.miner && d.start_epoch > deal.start_epoch));
    assert_eq!(node.devnet.cold.proposal_count(), 2);

    let after = node.pow.reconciler().run_once().await.unwrap();
    assert!(after.enqueued.is_empty());
    node.stop().await;
}

#[tokio::test]
async fn replace_moves_config_to_new_cid() {
    let node = Node::start(miners(&["f01000"])).await;
    let old = node.stage(b"version one").await;
    let new = node.stage(b"version two").await;
    let cfg = node.config();

    let first = node.terminal(node.apply(&old, Some(cfg.clone()), false).await).await;
    assert_eq!(first.status, JobStatus::Success);

    let id = node.pow.replace(node.profile, old.clone(), new.clone()).await.unwrap();
    let job = node.terminal(id).await;
    assert_eq!(job.status, JobStatus::Success, "{:?}", job.error_cause);
    assert_eq!(job.cid, new);

    let stores = node.pow.stores();
    assert_eq!(stores.cids.get_config(node.profile, &new).unwrap(), Some(cfg));
    assert!(stores
        .cids
        .get_config(node.profile, &old)
        .unwrap()
        .unwrap()
        .is_disabled());
    let got = node.pow.get_data(node.profile, &new).await.unwrap();
    assert_eq!(&got[..], b"version two");

    // The old cid no longer stores anything and can be removed.
    let wait = Duration::from_secs(5);
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        match node.pow.remove(node.profile, &old) {
            Ok(()) => break,
            Err(e) if e.is(ErrorKind::ActiveInStorage) && tokio::time::Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Err(e) => panic!("remove failed: {e}"),
        }
    }
    node.stop().await;
}

#[tokio::test]
async fn replace_unknown_cid_is_not_found() {
    let node = Node::start(miners(&["f01000"])).await;
    let a = node.stage(b"a").await;
    let b = node.stage(b"b").await;
    let err = node.pow.replace(node.profile, a, b).await.unwrap_err();
    assert!(err.is(ErrorKind::NotFound), "{err}");
    node.stop().await;
}
