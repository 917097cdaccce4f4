//! End-to-end API tests: a real server bound to an ephemeral port, a
//! [`FakeDriver`] standing in for Docker, and (for the webhook scenario) a
//! second tiny axum server recording what it was POSTed to.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use jobrunner_api::{routes, webhook, AppState};
use jobrunner_bus::{ContainerEventBus, StopBus};
use jobrunner_core::{ContainerDriver, Job};
use jobrunner_driver::FakeDriver;
use jobrunner_engine::{EngineConfig, JobManager};
use jobrunner_store::InMemoryJobStore;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

/// Boot a full server on an ephemeral port backed by a fresh [`FakeDriver`].
/// Returns the base URL.
async fn spawn_server() -> String {
    let driver: Arc<dyn ContainerDriver> = Arc::new(FakeDriver::new());
    let store = Arc::new(InMemoryJobStore::new());
    let container_bus = Arc::new(ContainerEventBus::spawn(driver.clone()));
    let stop_bus = StopBus::new();
    let http_client = webhook::client();

    let on_terminal: Arc<dyn Fn(Job) + Send + Sync> = {
        let http_client = http_client.clone();
        Arc::new(move |job| webhook::send(http_client.clone(), job))
    };

    let manager = JobManager::spawn(
        store.clone(),
        driver.clone(),
        container_bus,
        stop_bus,
        EngineConfig::default(),
        on_terminal,
    );

    let state = AppState {
        store,
        driver,
        manager,
        http_client,
    };

    let app = routes::router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}")
}

/// A minimal webhook receiver that records the single body it was POSTed.
async fn spawn_webhook_recorder() -> (String, Arc<Mutex<Option<Value>>>) {
    let received: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));

    async fn record(State(received): State<Arc<Mutex<Option<Value>>>>, Json(body): Json<Value>) {
        *received.lock().await = Some(body);
    }

    let app = Router::new()
        .route("/hook", post(record))
        .with_state(received.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}/hook"), received)
}

async fn poll_until_terminal(client: &reqwest::Client, base: &str, id: i64) -> Value {
    for _ in 0..50 {
        let job: Value = client
            .get(format!("{base}/jobs/{id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let status = job["status"].as_str().unwrap_or_default();
        if matches!(status, "successful" | "failed" | "error" | "stopped") {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {id} did not reach a terminal state in time");
}

#[tokio::test]
async fn happy_path_job_runs_to_completion() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/jobs"))
        .json(&json!({
            "image": "ubuntu:14.04",
            "cmds": [["echo", "hello"]],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let created: Value = response.json().await.unwrap();
    let id = created["id"].as_i64().unwrap();

    let job = poll_until_terminal(&client, &base, id).await;
    assert_eq!(job["status"], "successful");
    assert_eq!(job["results"], json!([0]));
}

#[tokio::test]
async fn failing_command_marks_job_failed_and_stops_the_chain() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();

    let created: Value = client
        .post(format!("{base}/jobs"))
        .json(&json!({
            "image": "ubuntu:14.04",
            "cmds": [["false"], ["echo", "never runs"]],
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["id"].as_i64().unwrap();

    let job = poll_until_terminal(&client, &base, id).await;
    assert_eq!(job["status"], "failed");
    assert_eq!(job["results"], json!([1]));
}

#[tokio::test]
async fn missing_image_is_reported_as_error() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();

    let created: Value = client
        .post(format!("{base}/jobs"))
        .json(&json!({
            "image": "doesnotexist",
            "cmds": [["echo", "hi"]],
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["id"].as_i64().unwrap();

    let job = poll_until_terminal(&client, &base, id).await;
    assert_eq!(job["status"], "error");
}

#[tokio::test]
async fn stop_request_halts_a_running_job() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();

    let created: Value = client
        .post(format!("{base}/jobs"))
        .json(&json!({
            "image": "ubuntu:14.04",
            "cmds": [["sleep", "10"]],
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["id"].as_i64().unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let stop_response = client
        .post(format!("{base}/jobs/{id}/stop"))
        .send()
        .await
        .unwrap();
    assert_eq!(stop_response.status(), 202);

    let job = poll_until_terminal(&client, &base, id).await;
    assert_eq!(job["status"], "stopped");
}

#[tokio::test]
async fn job_logs_concatenate_every_container_in_order() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();

    let created: Value = client
        .post(format!("{base}/jobs"))
        .json(&json!({
            "image": "ubuntu:14.04",
            "cmds": [["echo", "one"], ["echo", "two"]],
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["id"].as_i64().unwrap();
    poll_until_terminal(&client, &base, id).await;

    let logs = client
        .get(format!("{base}/jobs/{id}/logs"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(logs, "one\ntwo\n");
}

#[tokio::test]
async fn get_job_returns_404_for_unknown_id() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();

    let response = client.get(format!("{base}/jobs/999999")).send().await.unwrap();
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn create_job_rejects_an_empty_image() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/jobs"))
        .json(&json!({"image": "", "cmds": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn webhook_fires_exactly_once_on_terminal_transition() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();
    let (webhook_url, received) = spawn_webhook_recorder().await;

    let created: Value = client
        .post(format!("{base}/jobs"))
        .json(&json!({
            "image": "ubuntu:14.04",
            "cmds": [["echo", "hi"]],
            "webhook_url": webhook_url,
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["id"].as_i64().unwrap();
    poll_until_terminal(&client, &base, id).await;

    // The webhook POST is fire-and-forget from the server's perspective;
    // give it a moment to land before asserting.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let body = received.lock().await.clone().expect("webhook was never called");
    assert_eq!(body["id"].as_i64().unwrap(), id);
    assert_eq!(body["status"], "successful");
}

#[tokio::test]
async fn health_and_readiness_endpoints_report_ok() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();

    let health = client.get(format!("{base}/health")).send().await.unwrap();
    assert_eq!(health.status(), 200);

    let ready = client.get(format!("{base}/health/ready")).send().await.unwrap();
    assert_eq!(ready.status(), 200);
}
