//! The client pipeline against a live `powd` router on a loopback port.

mod common;

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use common::{miners, Node};
use pow_api::config::ServerConfig;
use pow_api::state::AppState;
use pow_client::pipeline::{Backoff, Pipeline, PipelineConfig, ResultsFile, TaskStage};
use pow_client::PowClient;
use pow_core::rpc::ListJobsQuery;
use pow_core::JobStatus;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

async fn serve(node: &Node) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = pow_api::app(AppState::new(node.pow.clone(), ServerConfig::default()));
    let server = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, server)
}

fn write(path: &Path, len: usize) {
    let body: Vec<u8> = path
        .to_string_lossy()
        .bytes()
        .cycle()
        .take(len)
        .collect();
    std::fs::write(path, body).unwrap();
}

fn config() -> PipelineConfig {
    let fast = Backoff::new(Duration::from_millis(20), Duration::from_millis(200));
    PipelineConfig {
        max_staged_bytes: 25,
        max_deal_bytes: 12,
        ready_backoff: fast,
        watch_backoff: fast,
        ..PipelineConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn folder_pipeline_completes_and_resumes() {
    let node = Node::start(miners(&["f01000", "f01001"])).await;
    let (addr, server) = serve(&node).await;
    let client = PowClient::new(&format!("http://{addr}"))
        .unwrap()
        .with_token(node.token.clone());

    let folder = tempfile::tempdir().unwrap();
    write(&folder.path().join("a.bin"), 10);
    write(&folder.path().join("b.bin"), 12);
    std::fs::create_dir(folder.path().join("c")).unwrap();
    write(&folder.path().join("c").join("one.txt"), 5);
    write(&folder.path().join("c").join("two.txt"), 5);
    write(&folder.path().join(".hidden"), 3);

    let state = tempfile::tempdir().unwrap();
    let results = state.path().join("results.json");

    let pipeline = Pipeline::for_folder(
        client.clone(),
        config(),
        ResultsFile::new(&results),
        folder.path(),
        false,
    )
    .unwrap();
    let report = pipeline.run().await.unwrap();
    assert_eq!(report.total, 3);
    assert_eq!(report.complete, 3, "{report:?}");
    assert_eq!(report.errored, 0);

    let tasks = ResultsFile::new(&results).load().unwrap();
    assert!(tasks.iter().all(|t| t.stage == TaskStage::Complete));
    for task in &tasks {
        let cid = task.cid.clone().unwrap();
        let info = client.storage_info(&cid).await.unwrap();
        assert_eq!(Some(info.job_id), task.job_id);
    }

    let jobs = client.list_jobs(&ListJobsQuery::default()).await.unwrap().jobs;
    assert_eq!(jobs.len(), 3);
    assert!(jobs.iter().all(|j| j.status == JobStatus::Success));

    // Resuming a finished run applies nothing new.
    let resumed = Pipeline::resume(client.clone(), config(), ResultsFile::new(&results), false)
        .unwrap()
        .run()
        .await
        .unwrap();
    assert_eq!(resumed.complete, 3);
    let jobs = client.list_jobs(&ListJobsQuery::default()).await.unwrap().jobs;
    assert_eq!(jobs.len(), 3);

    server.abort();
    node.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oversized_entry_errors_without_blocking_others() {
    let node = Node::start(miners(&["f01000"])).await;
    let (addr, server) = serve(&node).await;
    let client = PowClient::new(&format!("http://{addr}"))
        .unwrap()
        .with_token(node.token.clone());

    let folder = tempfile::tempdir().unwrap();
    write(&folder.path().join("big.bin"), 40);
    write(&folder.path().join("small.bin"), 8);
    let state = tempfile::tempdir().unwrap();

    let report = Pipeline::for_folder(
        client,
        config(),
        ResultsFile::new(state.path().join("results.json")),
        folder.path(),
        false,
    )
    .unwrap()
    .run()
    .await
    .unwrap();
    assert_eq!(report.total, 2);
    assert_eq!(report.complete, 1);
    assert_eq!(report.errored, 1);

    server.abort();
    node.stop().await;
}
