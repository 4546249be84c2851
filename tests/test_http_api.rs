mod common;

use std::sync::Arc;
use std::time::Duration;

use capsule_arena::api;
use capsule_arena::registry::MemoryRegistry;
use capsule_arena::store::FileRunStore;
use common::{FakeCapsule, arena, test_config};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

struct Server {
    base: String,
    cancel: CancellationToken,
}

impl Drop for Server {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn serve(data_dir: &std::path::Path) -> Server {
    let config = test_config();
    let store = FileRunStore::open(data_dir).await.expect("open store");
    let state = arena(&config, Arc::new(store), Arc::new(MemoryRegistry::new()));
    let router = api::build_router(state, config.server.max_body_bytes);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let cancel = CancellationToken::new();
    let server_cancel = cancel.clone();
    tokio::spawn(async move {
        api::serve(router, listener, server_cancel).await.ok();
    });
    Server {
        base: format!("http://{addr}"),
        cancel,
    }
}

async fn poll_completed(client: &reqwest::Client, base: &str, run_id: &str) -> Value {
    for _ in 0..250 {
        let status: Value = client
            .get(format!("{base}/battle/status/{run_id}"))
            .send()
            .await
            .expect("status request")
            .json()
            .await
            .expect("status body");
        if status["status"] == "completed" && status["task_active"] == false {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("run {run_id} did not complete");
}

/// Register capsules, battle them, read the run back and evolve from it,
/// all over the wire.
#[tokio::test(flavor = "multi_thread")]
async fn battle_and_evolve_over_http() {
    let attacker = FakeCapsule::spawn("payload", Duration::ZERO).await;
    let defender = FakeCapsule::spawn("refused", Duration::ZERO).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let server = serve(dir.path()).await;
    let base = &server.base;
    let client = reqwest::Client::new();

    let red: Value = client
        .post(format!("{base}/capsules"))
        .json(&json!({
            "name": "red",
            "role": "attack",
            "image": "red:1",
            "config": { "service_url": attacker.url },
        }))
        .send()
        .await
        .expect("create capsule")
        .json()
        .await
        .expect("capsule body");
    let red_id = red["id"].as_str().expect("capsule id").to_owned();

    let resp = client
        .post(format!("{base}/battle/start"))
        .json(&json!({
            "attacker_url": attacker.url,
            "defender_url": defender.url,
            "rounds": 3,
            "interval_seconds": 0.05,
            "meta": { "attacker_id": red_id, "campaign": "smoke" },
        }))
        .send()
        .await
        .expect("start request");
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let started: Value = resp.json().await.expect("start body");
    assert_eq!(started["status"], "started");
    let run_id = started["run_id"].as_str().expect("run id").to_owned();
    assert_eq!(run_id.len(), 8);

    let status = poll_completed(&client, base, &run_id).await;
    assert_eq!(status["total_rounds"], 3);
    assert!(status.get("rounds").is_none());

    let full: Value = client
        .get(format!("{base}/battle/get/{run_id}"))
        .send()
        .await
        .expect("get request")
        .json()
        .await
        .expect("get body");
    assert_eq!(full["rounds"].as_array().expect("rounds").len(), 3);
    assert_eq!(full["meta"]["campaign"], "smoke");

    // The record is on disk.
    assert!(dir.path().join("battles").join(format!("{run_id}.json")).exists());

    let listing: Value = client
        .get(format!("{base}/battle/list"))
        .send()
        .await
        .expect("list request")
        .json()
        .await
        .expect("list body");
    assert_eq!(listing["runs"].as_array().expect("runs").len(), 1);

    let eval: Value = client
        .get(format!("{base}/evolve/status/{run_id}"))
        .send()
        .await
        .expect("evolve status")
        .json()
        .await
        .expect("evaluation body");
    assert_eq!(eval["breaches"], 0);

    let resp = client
        .post(format!("{base}/evolve/{run_id}"))
        .send()
        .await
        .expect("evolve request");
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let evolved: Value = resp.json().await.expect("evolve body");
    assert_eq!(evolved["strategy"], "attack_explore");
    assert_eq!(evolved["mutated"]["parent_id"], red_id.as_str());

    let health: Value = client
        .get(format!("{base}/health"))
        .send()
        .await
        .expect("health")
        .json()
        .await
        .expect("health body");
    assert_eq!(health["ok"], true);
    assert_eq!(health["active_runs"], 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn errors_carry_detail() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = serve(dir.path()).await;
    let base = &server.base;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/battle/stop/ghost"))
        .send()
        .await
        .expect("stop request");
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    let body: Value = resp.json().await.expect("error body");
    assert!(body["detail"].as_str().expect("detail").contains("ghost"));

    let resp = client
        .post(format!("{base}/battle/start"))
        .json(&json!({
            "attacker_url": "http://a:1",
            "defender_url": "http://d:1",
            "rounds": 0,
        }))
        .send()
        .await
        .expect("start request");
    assert_eq!(resp.status(), reqwest::StatusCode::UNPROCESSABLE_ENTITY);

    let resp = client
        .post(format!("{base}/battle/start"))
        .json(&json!({
            "attacker_url": "http://a:1",
            "defender_url": "http://d:1",
            "surprise": true,
        }))
        .send()
        .await
        .expect("start request");
    assert_eq!(resp.status(), reqwest::StatusCode::UNPROCESSABLE_ENTITY);

    let resp = client
        .get(format!("{base}/capsules/nope"))
        .send()
        .await
        .expect("capsule request");
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
}
