use std::sync::Arc;
use std::time::Duration;

use coachgen_ai::{ErrorCategory, SimulatedGenerator};
use coachgen_core::UserId;
use coachgen_infra::{InMemoryQueueStore, Orchestrator, OrchestratorConfig, RetryPolicy};
use reqwest::StatusCode;
use serde_json::{Value, json};

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(generation: Duration, config: OrchestratorConfig) -> Self {
        // Same router as prod over an in-memory store, on an ephemeral port.
        let orchestrator = Orchestrator::new(
            Arc::new(InMemoryQueueStore::new()),
            Arc::new(SimulatedGenerator::new(generation)),
            config,
        );
        let app = coachgen_api::app::build_router(Arc::new(orchestrator));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }

    async fn default() -> Self {
        Self::spawn(
            Duration::from_millis(300),
            OrchestratorConfig::default().with_poll_interval(Duration::from_millis(25)),
        )
        .await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn generate(
    client: &reqwest::Client,
    server: &TestServer,
    user: UserId,
    request_id: &str,
) -> (StatusCode, Vec<Value>) {
    let res = client
        .post(format!("{}/generations", server.base_url))
        .header("x-user-id", user.to_string())
        .json(&json!({"requestId": request_id, "kind": "workout_plan", "inputs": {"days": 3}}))
        .send()
        .await
        .unwrap();
    let status = res.status();
    let body = res.text().await.unwrap();
    let lines = if status == StatusCode::OK {
        body.lines().map(|l| serde_json::from_str(l).unwrap()).collect()
    } else {
        vec![serde_json::from_str(&body).unwrap()]
    };
    (status, lines)
}

#[tokio::test]
async fn health_is_public() {
    let server = TestServer::default().await;
    let res = reqwest::get(format!("{}/health", server.base_url)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn generation_routes_require_a_user() {
    let server = TestServer::default().await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/generations", server.base_url))
        .json(&json!({"requestId": "r1", "kind": "workout_plan"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(format!("{}/generations/r1", server.base_url))
        .header("x-user-id", "not-a-uuid")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
async fn streams_ndjson_until_complete() {
    let server = TestServer::default().await;
    let client = reqwest::Client::new();
    let user = UserId::new();

    let res = client
        .post(format!("{}/generations", server.base_url))
        .header("x-user-id", user.to_string())
        .json(&json!({"requestId": "r1", "kind": "workout_plan", "inputs": {"days": 3}}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        res.headers()["content-type"].to_str().unwrap(),
        "application/x-ndjson"
    );

    let body = res.text().await.unwrap();
    let events: Vec<Value> = body.lines().map(|l| serde_json::from_str(l).unwrap()).collect();

    assert_eq!(events.first().unwrap()["phase"], "starting");
    let last = events.last().unwrap();
    assert_eq!(last["phase"], "complete");
    assert_eq!(last["progress"], 100);
    assert!(last["resultRef"].as_str().unwrap().starts_with("workout_plan-"));
    assert_eq!(last["result"]["inputs"], json!({"days": 3}));

    let progress: Vec<u64> = events.iter().map(|e| e["progress"].as_u64().unwrap()).collect();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{progress:?}");
}

#[tokio::test]
async fn reconnect_replays_the_same_result() {
    let server = TestServer::default().await;
    let client = reqwest::Client::new();
    let user = UserId::new();

    let (_, first) = generate(&client, &server, user, "r-replay").await;
    let (status, second) = generate(&client, &server, user, "r-replay").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(second.last().unwrap()["phase"], "complete");
    assert_eq!(second.last().unwrap()["resultRef"], first.last().unwrap()["resultRef"]);
    assert!(second.len() <= 2, "replay must not restart progress: {second:?}");
}

#[tokio::test]
async fn request_ids_are_scoped_to_their_owner() {
    let server = TestServer::default().await;
    let client = reqwest::Client::new();
    let owner = UserId::new();

    generate(&client, &server, owner, "r-owned").await;

    let (status, body) = generate(&client, &server, UserId::new(), "r-owned").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body[0]["error"], "forbidden");

    let res = client
        .get(format!("{}/generations/r-owned", server.base_url))
        .header("x-user-id", owner.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let entry: Value = res.json().await.unwrap();
    assert_eq!(entry["status"], "completed");
    assert_eq!(entry["progressPercent"], 100);

    let res = client
        .get(format!("{}/generations/unknown", server.base_url))
        .header("x-user-id", owner.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn rejects_invalid_request_ids() {
    let server = TestServer::default().await;
    let client = reqwest::Client::new();

    let (status, body) = generate(&client, &server, UserId::new(), "has spaces").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body[0]["error"], "invalid_request_id");
}

#[tokio::test]
async fn inline_execution_without_background_platform() {
    let server = TestServer::spawn(
        Duration::from_millis(300),
        OrchestratorConfig::default().with_background(false),
    )
    .await;
    let client = reqwest::Client::new();

    let (status, events) = generate(&client, &server, UserId::new(), "r-inline").await;
    assert_eq!(status, StatusCode::OK);
    let phases: Vec<&str> = events.iter().map(|e| e["phase"].as_str().unwrap()).collect();
    assert_eq!(phases.first(), Some(&"starting"));
    assert_eq!(&phases[phases.len() - 2..], ["finalize", "complete"]);
}

#[tokio::test]
async fn ceiling_timeout_surfaces_a_user_facing_error() {
    let server = TestServer::spawn(
        Duration::from_millis(600),
        OrchestratorConfig::default()
            .with_ceiling(Duration::from_millis(100))
            .with_retry(RetryPolicy::no_retry())
            .with_poll_interval(Duration::from_millis(25)),
    )
    .await;
    let client = reqwest::Client::new();

    let (_, events) = generate(&client, &server, UserId::new(), "r-timeout").await;
    let last = events.last().unwrap();
    assert_eq!(last["phase"], "error");
    assert_eq!(last["error"], ErrorCategory::Timeout.user_message());
}
