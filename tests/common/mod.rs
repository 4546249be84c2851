//! Shared fixtures for integration tests.
//!
//! [`FakeCapsule`] is a real HTTP capsule on an ephemeral port; [`arena`]
//! wires the engine around it with an in-memory store.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use capsule_arena::api::{AppState, Components};
use capsule_arena::battle::{HttpAgentClient, Judge, KeywordJudge, create_http_client};
use capsule_arena::config::{ArenaConfig, StorageBackend};
use capsule_arena::error::StoreError;
use capsule_arena::model::BattleRun;
use capsule_arena::registry::CapsuleRegistry;
use capsule_arena::store::{MemoryRunStore, RunStore};

struct CapsuleState {
    reply: String,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// A capsule answering `POST /call_tool` with a fixed text after `delay`.
pub struct FakeCapsule {
    pub url: String,
    state: Arc<CapsuleState>,
    cancel: CancellationToken,
}

impl FakeCapsule {
    pub async fn spawn(reply: &str, delay: Duration) -> Self {
        let state = Arc::new(CapsuleState {
            reply: reply.to_owned(),
            delay,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        });
        let router = Router::new()
            .route("/call_tool", post(call_tool))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake capsule");
        let addr = listener.local_addr().expect("local addr");
        let cancel = CancellationToken::new();
        let server_cancel = cancel.clone();
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { server_cancel.cancelled().await })
                .await
                .ok();
        });

        Self {
            url: format!("http://{addr}"),
            state,
            cancel,
        }
    }

    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls that were being served at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Drop for FakeCapsule {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn call_tool(State(state): State<Arc<CapsuleState>>, Json(body): Json<Value>) -> Json<Value> {
    state.calls.fetch_add(1, Ordering::SeqCst);
    let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    state.max_in_flight.fetch_max(now, Ordering::SeqCst);

    tokio::time::sleep(state.delay).await;

    state.in_flight.fetch_sub(1, Ordering::SeqCst);
    let prompt = body["arguments"]["prompt"].as_str().unwrap_or_default();
    Json(json!([{ "type": "text", "text": format!("{} <{prompt}>", state.reply) }]))
}

/// A judge service answering every `POST /judge` with a fixed JSON body
/// and keeping the bodies it was sent.
pub struct FakeJudge {
    pub url: String,
    requests: Arc<Mutex<Vec<Value>>>,
    cancel: CancellationToken,
}

impl FakeJudge {
    pub async fn spawn(reply: Value) -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);
        let router = Router::new().route(
            "/judge",
            post(move |Json(body): Json<Value>| {
                let seen = Arc::clone(&seen);
                let reply = reply.clone();
                async move {
                    seen.lock().expect("judge requests").push(body);
                    Json(reply)
                }
            }),
        );

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake judge");
        let addr = listener.local_addr().expect("local addr");
        let cancel = CancellationToken::new();
        let server_cancel = cancel.clone();
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { server_cancel.cancelled().await })
                .await
                .ok();
        });

        Self {
            url: format!("http://{addr}/judge"),
            requests,
            cancel,
        }
    }

    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().expect("judge requests").clone()
    }
}

impl Drop for FakeJudge {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Defaults tightened for tests: one attempt, short timeouts, memory store.
pub fn test_config() -> ArenaConfig {
    let mut config = ArenaConfig::default();
    config.storage.backend = StorageBackend::Memory;
    config.executor.max_attempts = 1;
    config.executor.attempt_timeout_ms = 2_000;
    config.executor.backoff_base_ms = 10;
    config.executor.backoff_max_ms = 20;
    config
}

/// Engine over real HTTP clients and the given store/registry.
pub fn arena(
    config: &ArenaConfig,
    store: Arc<dyn RunStore>,
    registry: Arc<dyn CapsuleRegistry>,
) -> AppState {
    let judge = Arc::new(KeywordJudge::new(&config.judge.breach_tokens));
    arena_with_judge(config, store, registry, judge)
}

/// Same as [`arena`] with an explicit judge.
pub fn arena_with_judge(
    config: &ArenaConfig,
    store: Arc<dyn RunStore>,
    registry: Arc<dyn CapsuleRegistry>,
    judge: Arc<dyn Judge>,
) -> AppState {
    let http = create_http_client().expect("http client");
    AppState::new(
        config,
        Components {
            store,
            registry,
            agents: Arc::new(HttpAgentClient::new(http, config.executor.attempt_timeout())),
            judge,
        },
    )
}

/// Polls until `run_id` is terminal and its task has let go of the slot.
pub async fn wait_terminal(state: &AppState, run_id: &str, within: Duration) -> BattleRun {
    tokio::time::timeout(within, async {
        loop {
            if let Ok(run) = state.status.get(run_id).await {
                if run.status.is_terminal() && !state.scheduler.table().is_live(run_id) {
                    return run;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("run {run_id} did not finish within {within:?}"))
}

/// Polls until `run_id` has at least `rounds` persisted rounds.
pub async fn wait_rounds(state: &AppState, run_id: &str, rounds: u32, within: Duration) {
    tokio::time::timeout(within, async {
        loop {
            if let Ok(run) = state.status.get(run_id).await {
                if run.total_rounds >= rounds {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("run {run_id} never reached {rounds} rounds"));
}

/// Store whose `save` fails exactly once, on the `fail_on`-th call (1-based).
pub struct FlakyStore {
    inner: MemoryRunStore,
    saves: AtomicUsize,
    fail_on: usize,
}

impl FlakyStore {
    pub fn new(fail_on: usize) -> Self {
        Self {
            inner: MemoryRunStore::new(),
            saves: AtomicUsize::new(0),
            fail_on,
        }
    }
}

#[async_trait]
impl RunStore for FlakyStore {
    async fn save(&self, run: &BattleRun) -> Result<(), StoreError> {
        let n = self.saves.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_on {
            return Err(StoreError::Rejected {
                run_id: run.run_id.clone(),
                message: "disk full".into(),
            });
        }
        self.inner.save(run).await
    }

    async fn load(&self, run_id: &str) -> Result<Option<BattleRun>, StoreError> {
        self.inner.load(run_id).await
    }

    async fn list(&self) -> Result<Vec<BattleRun>, StoreError> {
        self.inner.list().await
    }
}
