//! Wiring of the engine components shared by every request handler.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::battle::{
    AgentClient, HttpAgentClient, HttpJudge, Judge, KeywordJudge, RetryPolicy, RoundExecutor,
    RunEngine, RunTable, Scheduler, create_http_client,
};
use crate::config::ArenaConfig;
use crate::error::Result;
use crate::evolution::EvolutionController;
use crate::registry::{CapsuleRegistry, MemoryRegistry};
use crate::status::StatusService;
use crate::store::{self, RunStore};

/// Collaborators the engine talks to. Everything else is derived.
pub struct Components {
    pub store: Arc<dyn RunStore>,
    pub registry: Arc<dyn CapsuleRegistry>,
    pub agents: Arc<dyn AgentClient>,
    pub judge: Arc<dyn Judge>,
}

impl Components {
    /// Production collaborators as selected by `config`.
    ///
    /// # Errors
    ///
    /// Fails if the store cannot be opened or the HTTP client cannot be built.
    pub async fn from_config(config: &ArenaConfig) -> Result<Self> {
        let http = create_http_client()?;
        let timeout = config.executor.attempt_timeout();
        let judge: Arc<dyn Judge> = match &config.judge.url {
            Some(url) => Arc::new(HttpJudge::new(http.clone(), url.clone(), timeout)),
            None => Arc::new(KeywordJudge::new(&config.judge.breach_tokens)),
        };
        Ok(Self {
            store: store::from_settings(&config.storage).await?,
            registry: Arc::new(MemoryRegistry::new()),
            agents: Arc::new(HttpAgentClient::new(http, timeout)),
            judge,
        })
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub evolution: Arc<EvolutionController>,
    pub status: Arc<StatusService>,
    pub registry: Arc<dyn CapsuleRegistry>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Assembles the engine from its collaborators.
    #[must_use]
    pub fn new(config: &ArenaConfig, components: Components) -> Self {
        let Components {
            store,
            registry,
            agents,
            judge,
        } = components;

        let table = Arc::new(RunTable::new());
        let executor = Arc::new(RoundExecutor::new(
            agents,
            judge,
            RetryPolicy::from(&config.executor),
            config.judge.failure_policy,
        ));
        let engine = Arc::new(RunEngine::new(
            Arc::clone(&store),
            executor,
            config.battle.max_consecutive_failures,
        ));
        let scheduler = Arc::new(Scheduler::new(
            engine,
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&table),
            config.battle.clone(),
            &config.executor,
        ));

        Self {
            scheduler,
            evolution: Arc::new(EvolutionController::new(
                Arc::clone(&store),
                Arc::clone(&registry),
            )),
            status: Arc::new(StatusService::new(store, table)),
            registry,
            metrics: None,
        }
    }

    /// Attaches the Prometheus handle rendered by `GET /metrics`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}
