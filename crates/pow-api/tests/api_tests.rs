//! # HTTP Tests for pow-api
//!
//! Drives the full router with `oneshot` over devnet back-ends: health
//! probes, token auth, error mapping, the stage/apply/watch/get flow, and
//! wallet signing.

use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use pow_api::config::ServerConfig;
use pow_api::state::AppState;
use pow_devnet::{Devnet, DevnetConfig};
use pow_engine::{EngineConfig, Powergate};
use pow_store::Stores;

struct TestServer {
    app: Router,
    _tasks: Vec<tokio::task::JoinHandle<()>>,
}

fn server(admin_token: Option<&str>) -> TestServer {
    let devnet = Devnet::new(DevnetConfig::default().with_block_time(Duration::from_millis(5)))
        .unwrap();
    let tasks = devnet.spawn();
    let engine = EngineConfig::default()
        .with_poll_interval(Duration::from_millis(10))
        .with_deal_finality_timeout(Duration::from_secs(10));
    let powergate = Powergate::new(Stores::in_memory().unwrap(), devnet.capabilities(), engine);
    powergate.start().unwrap();
    let config = ServerConfig {
        admin_token: admin_token.map(String::from),
        ..ServerConfig::default()
    };
    TestServer {
        app: pow_api::app(AppState::new(powergate, config)),
        _tasks: tasks,
    }
}

async fn body_string(response: axum::http::Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: axum::http::Response<Body>) -> Value {
    serde_json::from_str(&body_string(response).await).unwrap()
}

fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("x-ffs-token", token);
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, req: Request<Body>) -> axum::http::Response<Body> {
    app.clone().oneshot(req).await.unwrap()
}

async fn create_profile(app: &Router) -> (String, String) {
    let resp = send(app, request(Method::POST, "/v1/admin/profiles", None, None)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    (
        body["id"].as_str().unwrap().to_string(),
        body["token"].as_str().unwrap().to_string(),
    )
}

async fn stage(app: &Router, token: &str, data: &'static [u8]) -> String {
    let req = Request::builder()
        .method(Method::POST)
        .uri("/v1/data/stage")
        .header("x-ffs-token", token)
        .body(Body::from(data))
        .unwrap();
    let resp = send(app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    body_json(resp).await["cid"].as_str().unwrap().to_string()
}

// -- Health Probes ------------------------------------------------------------

#[tokio::test]
async fn health_probes_need_no_token() {
    let s = server(Some("admin"));
    let resp = send(&s.app, request(Method::GET, "/health/liveness", None, None)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_string(resp).await, "ok");
    let resp = send(&s.app, request(Method::GET, "/health/readiness", None, None)).await;
    assert_eq!(body_string(resp).await, "ready");
}

#[tokio::test]
async fn metrics_route_is_404_without_recorder() {
    let s = server(None);
    let resp = send(&s.app, request(Method::GET, "/metrics", None, None)).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// -- Authentication -----------------------------------------------------------

#[tokio::test]
async fn user_routes_require_a_valid_token() {
    let s = server(None);
    let resp = send(&s.app, request(Method::GET, "/v1/wallet/addrs", None, None)).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(resp).await["error"]["code"], "UNAUTHENTICATED");

    let resp = send(
        &s.app,
        request(Method::GET, "/v1/wallet/addrs", Some("wrong"), None),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(resp).await["error"]["code"], "PERMISSION_DENIED");

    let (_, token) = create_profile(&s.app).await;
    let resp = send(
        &s.app,
        request(Method::GET, "/v1/wallet/addrs", Some(&token), None),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let addrs = body_json(resp).await;
    assert_eq!(addrs.as_array().unwrap().len(), 1);
    assert_eq!(addrs[0]["name"], "Initial Address");
}

#[tokio::test]
async fn admin_routes_check_admin_token() {
    let s = server(Some("s3cret"));
    let resp = send(&s.app, request(Method::GET, "/v1/admin/profiles", None, None)).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let req = Request::builder()
        .uri("/v1/admin/profiles")
        .header("x-ffs-admin-token", "guess")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&s.app, req).await.status(), StatusCode::FORBIDDEN);

    let req = Request::builder()
        .method(Method::POST)
        .uri("/v1/admin/profiles")
        .header("x-ffs-admin-token", "s3cret")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&s.app, req).await.status(), StatusCode::OK);

    let req = Request::builder()
        .uri("/v1/admin/profiles")
        .header("x-ffs-admin-token", "s3cret")
        .body(Body::empty())
        .unwrap();
    let profiles = body_json(send(&s.app, req).await).await;
    assert_eq!(profiles.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn ipfs_add_uses_its_own_header() {
    let s = server(None);
    let (_, token) = create_profile(&s.app).await;

    let req = Request::builder()
        .method(Method::POST)
        .uri("/ipfs/add")
        .header("x-ffs-token", &token)
        .body(Body::from("file"))
        .unwrap();
    assert_eq!(send(&s.app, req).await.status(), StatusCode::UNAUTHORIZED);

    let req = Request::builder()
        .method(Method::POST)
        .uri("/ipfs/add?codec=dag-json")
        .header("x-ipfs-ffs-auth", &token)
        .body(Body::from("{\"entries\":[]}"))
        .unwrap();
    let resp = send(&s.app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let cid = body_json(resp).await["cid"].as_str().unwrap().to_string();
    assert!(cid.starts_with('b'));
}

// -- Error mapping ------------------------------------------------------------

#[tokio::test]
async fn malformed_input_is_bad_request() {
    let s = server(None);
    let (_, token) = create_profile(&s.app).await;

    let resp = send(
        &s.app,
        request(Method::GET, "/v1/storage-info/not-a-cid", Some(&token), None),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(resp).await["error"]["code"], "INVALID_ARGUMENT");

    let resp = send(
        &s.app,
        request(Method::GET, "/v1/storage-jobs?limit=-1", Some(&token), None),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let req = Request::builder()
        .method(Method::POST)
        .uri("/v1/storage-config/apply")
        .header("x-ffs-token", &token)
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    assert_eq!(send(&s.app, req).await.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let s = server(None);
    let (_, token) = create_profile(&s.app).await;
    let uri = format!("/v1/storage-jobs/{}", uuid_like());
    let resp = send(&s.app, request(Method::GET, &uri, Some(&token), None)).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

fn uuid_like() -> &'static str {
    "7f1c3f1e-5d8a-4a3e-9a53-3c8f0f7a2b11"
}

// -- Data flow ----------------------------------------------------------------

#[tokio::test]
async fn stage_apply_watch_get() {
    let s = server(None);
    let (_, token) = create_profile(&s.app).await;
    let cid = stage(&s.app, &token, b"hello").await;

    let resp = send(
        &s.app,
        request(
            Method::POST,
            "/v1/storage-config/apply",
            Some(&token),
            Some(json!({ "cid": cid })),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let job_id = body_json(resp).await["job_id"].as_str().unwrap().to_string();

    // The watch stream ends once the job is terminal.
    let uri = format!("/v1/storage-jobs/watch?job_ids={job_id}");
    let resp = send(&s.app, request(Method::GET, &uri, Some(&token), None)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "application/x-ndjson");
    let body = tokio::time::timeout(Duration::from_secs(20), body_string(resp))
        .await
        .expect("job did not finish");
    let statuses: Vec<String> = body
        .lines()
        .map(|l| serde_json::from_str::<Value>(l).unwrap()["status"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(statuses.last().map(String::as_str), Some("SUCCESS"), "{body}");

    let resp = send(
        &s.app,
        request(Method::GET, &format!("/v1/data/{cid}"), Some(&token), None),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_string(resp).await, "hello");

    let resp = send(
        &s.app,
        request(Method::GET, &format!("/v1/storage-info/{cid}"), Some(&token), None),
    )
    .await;
    let info = body_json(resp).await;
    assert_eq!(info["hot"]["enabled"], true);

    // Applying again without override conflicts.
    let resp = send(
        &s.app,
        request(
            Method::POST,
            "/v1/storage-config/apply",
            Some(&token),
            Some(json!({ "cid": cid })),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    // Removing while storage is enabled fails the precondition.
    let resp = send(
        &s.app,
        request(
            Method::POST,
            "/v1/storage-config/remove",
            Some(&token),
            Some(json!({ "cid": cid })),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);
    assert_eq!(body_json(resp).await["error"]["code"], "ACTIVE_IN_STORAGE");

    // Another profile sees none of it.
    let (_, other) = create_profile(&s.app).await;
    let resp = send(
        &s.app,
        request(Method::GET, &format!("/v1/storage-jobs/{job_id}"), Some(&other), None),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn logs_replay_history() {
    let s = server(None);
    let (_, token) = create_profile(&s.app).await;
    let cid = stage(&s.app, &token, b"logged").await;
    let resp = send(
        &s.app,
        request(
            Method::POST,
            "/v1/storage-config/apply",
            Some(&token),
            Some(json!({ "cid": cid })),
        ),
    )
    .await;
    let job_id = body_json(resp).await["job_id"].as_str().unwrap().to_string();
    let uri = format!("/v1/storage-jobs/watch?job_ids={job_id}");
    let resp = send(&s.app, request(Method::GET, &uri, Some(&token), None)).await;
    tokio::time::timeout(Duration::from_secs(20), body_string(resp))
        .await
        .expect("job did not finish");

    let uri = format!("/v1/data/{cid}/logs?history=true&job_id={job_id}");
    let resp = send(&s.app, request(Method::GET, &uri, Some(&token), None)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let mut body = resp.into_body();
    let frame = tokio::time::timeout(Duration::from_secs(5), body.frame())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let first = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
    let entry: Value = serde_json::from_str(first.lines().next().unwrap()).unwrap();
    assert_eq!(entry["cid"], cid);
    assert_eq!(entry["job_id"], job_id);
}

// -- Wallet -------------------------------------------------------------------

#[tokio::test]
async fn sign_and_verify_hex_messages() {
    let s = server(None);
    let (_, token) = create_profile(&s.app).await;
    let addrs = body_json(
        send(
            &s.app,
            request(Method::GET, "/v1/wallet/addrs", Some(&token), None),
        )
        .await,
    )
    .await;
    let addr = addrs[0]["addr"].as_str().unwrap().to_string();
    let message = hex::encode(b"hello");

    let resp = send(
        &s.app,
        request(
            Method::POST,
            "/v1/wallet/sign",
            Some(&token),
            Some(json!({ "addr": addr, "message": message })),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let signature = body_json(resp).await["signature"].as_str().unwrap().to_string();

    let resp = send(
        &s.app,
        request(
            Method::POST,
            "/v1/wallet/verify",
            Some(&token),
            Some(json!({ "addr": addr, "message": message, "signature": signature })),
        ),
    )
    .await;
    assert_eq!(body_json(resp).await["valid"], true);

    let resp = send(
        &s.app,
        request(
            Method::POST,
            "/v1/wallet/sign",
            Some(&token),
            Some(json!({ "addr": addr, "message": "zz" })),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = send(
        &s.app,
        request(
            Method::GET,
            &format!("/v1/wallet/balance/{addr}"),
            Some(&token),
            None,
        ),
    )
    .await;
    assert!(body_json(resp).await["balance"].as_u64().unwrap() > 0);
}
