//! Multi-Match Scheduler.
//!
//! Turns start requests into queued runs, persists them, and spawns one task
//! per run. Multi-match requests share a semaphore sized to the request's
//! concurrency, so at most that many of its runs execute at once. Callers get
//! run ids back as soon as the runs are queued.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{BattleSettings, ExecutorSettings, PairingPolicy};
use crate::error::{ArenaError, Result};
use crate::model::{BattleRun, Capsule, CapsuleRole, RunMeta, RunStatus};
use crate::registry::CapsuleRegistry;
use crate::store::RunStore;

use super::engine::{RunEngine, RunPlan};
use super::executor::{Contestant, Matchup};
use super::table::{RunHandle, RunTable};

const fn default_rounds() -> u32 {
    20
}

const fn default_interval() -> f64 {
    1.0
}

const fn default_num_matches() -> usize {
    10
}

const fn default_attacker_role() -> CapsuleRole {
    CapsuleRole::Attack
}

const fn default_defender_role() -> CapsuleRole {
    CapsuleRole::Defense
}

/// Body of `POST /battle/start`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StartBattle {
    pub attacker_url: String,
    pub defender_url: String,
    #[serde(default)]
    pub attacker_model: Option<String>,
    #[serde(default)]
    pub defender_model: Option<String>,
    #[serde(default)]
    pub attacker_tool: Option<String>,
    #[serde(default)]
    pub defender_tool: Option<String>,
    #[serde(default = "default_rounds")]
    pub rounds: u32,
    #[serde(default = "default_interval")]
    pub interval_seconds: f64,
    /// Caller-chosen id; generated when absent.
    #[serde(default)]
    pub run_id: Option<String>,
    /// Extra context stored verbatim under the run's `meta`.
    #[serde(default)]
    pub meta: serde_json::Map<String, serde_json::Value>,
}

/// How a multi-match request finds its pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MultiMode {
    /// Pairs come from registered capsules filtered by role.
    FromRegistry,
    /// Pairs are listed explicitly in the request.
    #[default]
    ManualPairs,
}

/// One explicit pair in a `manual_pairs` request.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ManualPair {
    pub attacker_url: String,
    pub defender_url: String,
    #[serde(default)]
    pub attacker_model: Option<String>,
    #[serde(default)]
    pub defender_model: Option<String>,
    #[serde(default)]
    pub attacker_tool: Option<String>,
    #[serde(default)]
    pub defender_tool: Option<String>,
    #[serde(default)]
    pub rounds: Option<u32>,
    #[serde(default)]
    pub interval_seconds: Option<f64>,
}

/// Body of `POST /battle/start_multi`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StartMulti {
    #[serde(default)]
    pub mode: MultiMode,
    #[serde(default = "default_attacker_role")]
    pub attacker_role: CapsuleRole,
    #[serde(default = "default_defender_role")]
    pub defender_role: CapsuleRole,
    #[serde(default = "default_num_matches")]
    pub num_matches: usize,
    #[serde(default = "default_rounds")]
    pub rounds: u32,
    #[serde(default = "default_interval")]
    pub interval_seconds: f64,
    /// Falls back to `battle.default_concurrency`.
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub manual_pairs: Vec<ManualPair>,
    #[serde(default)]
    pub attacker_tool: Option<String>,
    #[serde(default)]
    pub defender_tool: Option<String>,
}

/// Result of a multi-match request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiStarted {
    pub started_run_ids: Vec<String>,
    pub num_requested: usize,
    /// Fewer runs were started than requested.
    pub partial: bool,
}

/// Orders every distinct `(attacker, defender)` combination that does not
/// pit a capsule against itself, and keeps the first `limit`.
///
/// Round-robin walks the defender list diagonally so consecutive matches
/// spread across both sides before any capsule repeats.
#[must_use]
pub fn plan_pairs(
    attackers: &[Capsule],
    defenders: &[Capsule],
    limit: usize,
    policy: PairingPolicy,
) -> Vec<(usize, usize)> {
    let mut pairs = Vec::with_capacity(attackers.len() * defenders.len());
    for offset in 0..defenders.len() {
        for (a, attacker) in attackers.iter().enumerate() {
            let d = (a + offset) % defenders.len();
            if attacker.id != defenders[d].id {
                pairs.push((a, d));
            }
        }
    }
    if policy == PairingPolicy::Random {
        pairs.shuffle(&mut rand::rng());
    }
    pairs.truncate(limit);
    pairs
}

/// Admits and spawns battle runs.
pub struct Scheduler {
    engine: Arc<RunEngine>,
    store: Arc<dyn RunStore>,
    registry: Arc<dyn CapsuleRegistry>,
    table: Arc<RunTable>,
    battle: BattleSettings,
    attacker_tool: String,
    defender_tool: String,
}

impl Scheduler {
    #[must_use]
    pub fn new(
        engine: Arc<RunEngine>,
        store: Arc<dyn RunStore>,
        registry: Arc<dyn CapsuleRegistry>,
        table: Arc<RunTable>,
        battle: BattleSettings,
        executor: &ExecutorSettings,
    ) -> Self {
        Self {
            engine,
            store,
            registry,
            table,
            battle,
            attacker_tool: executor.attacker_tool.clone(),
            defender_tool: executor.defender_tool.clone(),
        }
    }

    #[must_use]
    pub fn table(&self) -> &Arc<RunTable> {
        &self.table
    }

    /// Starts a single run immediately.
    ///
    /// # Errors
    ///
    /// `Validation` for bad parameters or a duplicate `run_id`;
    /// `Persistence` if the queued record cannot be written.
    pub async fn start(&self, req: StartBattle) -> Result<String> {
        let interval = self.validate_plan(req.rounds, req.interval_seconds)?;
        validate_url("attacker_url", &req.attacker_url)?;
        validate_url("defender_url", &req.defender_url)?;

        let run_id = match req.run_id {
            Some(id) => {
                validate_run_id(&id)?;
                if self.store.load(&id).await?.is_some() {
                    return Err(ArenaError::Validation(format!("run_id {id} already exists")));
                }
                id
            }
            None => self.unique_run_id(new_run_id).await?,
        };

        let matchup = Matchup {
            attacker: Contestant {
                url: req.attacker_url,
                tool: req.attacker_tool.unwrap_or_else(|| self.attacker_tool.clone()),
                model: req.attacker_model,
                capsule_id: None,
            },
            defender: Contestant {
                url: req.defender_url,
                tool: req.defender_tool.unwrap_or_else(|| self.defender_tool.clone()),
                model: req.defender_model,
                capsule_id: None,
            },
        };
        let plan = RunPlan {
            matchup,
            rounds: req.rounds,
            interval,
        };
        let (handle, run) = self.admit(&run_id, &plan, req.meta).await?;
        self.spawn(handle, run, plan, None);
        Ok(run_id)
    }

    /// Queues a batch of runs and returns their ids without waiting for any
    /// of them to start.
    ///
    /// # Errors
    ///
    /// `Validation` for bad parameters; `Persistence` if the first queued
    /// record cannot be written. A later write failure ends admission and
    /// returns the runs started so far with `partial` set.
    pub async fn start_multi(&self, req: StartMulti) -> Result<MultiStarted> {
        let concurrency = req.concurrency.unwrap_or(self.battle.default_concurrency);
        if concurrency == 0 || concurrency > self.battle.max_concurrency {
            return Err(ArenaError::Validation(format!(
                "concurrency must be between 1 and {}",
                self.battle.max_concurrency
            )));
        }

        let plans = match req.mode {
            MultiMode::ManualPairs => self.manual_plans(&req)?,
            MultiMode::FromRegistry => self.registry_plans(&req).await?,
        };
        let num_requested = match req.mode {
            MultiMode::ManualPairs => req.manual_pairs.len(),
            MultiMode::FromRegistry => req.num_matches,
        };

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut started_run_ids = Vec::with_capacity(plans.len());
        let mut admission_failed = false;
        for plan in plans {
            let admitted = match self.unique_run_id(new_run_id).await {
                Ok(run_id) => self
                    .admit(&run_id, &plan, serde_json::Map::new())
                    .await
                    .map(|admitted| (run_id, admitted)),
                Err(e) => Err(e),
            };
            match admitted {
                Ok((run_id, (handle, run))) => {
                    self.spawn(handle, run, plan, Some(Arc::clone(&semaphore)));
                    started_run_ids.push(run_id);
                }
                // Nothing is running yet, so the caller gets the error itself.
                Err(e) if started_run_ids.is_empty() => return Err(e),
                Err(e) => {
                    error!(
                        error = %e,
                        started = started_run_ids.len(),
                        "could not queue run, returning the batch started so far"
                    );
                    admission_failed = true;
                    break;
                }
            }
        }

        let partial = admission_failed || started_run_ids.len() < num_requested;
        if partial && !admission_failed {
            warn!(
                requested = num_requested,
                started = started_run_ids.len(),
                "not enough eligible capsule pairs, started a partial batch"
            );
        }
        info!(started = started_run_ids.len(), concurrency, "multi-match batch queued");

        Ok(MultiStarted {
            started_run_ids,
            num_requested,
            partial,
        })
    }

    /// Requests cancellation of a run.
    ///
    /// Live runs stop at their next round boundary. A persisted queued run
    /// with no live task is stopped directly. Terminal runs are left alone.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id.
    pub async fn stop(&self, run_id: &str) -> Result<()> {
        if self.table.cancel(run_id) {
            info!(run_id, "stop requested");
            return Ok(());
        }
        let Some(mut run) = self.store.load(run_id).await? else {
            return Err(ArenaError::run_not_found(run_id));
        };
        if !run.status.is_terminal() {
            // No task owns this record any more (e.g. after a restart).
            run.stop_requested = true;
            run.transition(RunStatus::Stopped)?;
            self.store.save(&run).await?;
            info!(run_id, "orphaned run marked stopped");
        }
        Ok(())
    }

    /// Cancels every live run.
    pub fn shutdown(&self) {
        self.table.cancel_all();
    }

    /// Cancels every live run and waits up to `grace` for their tasks to
    /// persist a terminal record. Returns `false` if some were still live.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.shutdown();
        let deadline = tokio::time::Instant::now() + grace;
        while self.table.live_count() > 0 {
            if tokio::time::Instant::now() >= deadline {
                warn!(live = self.table.live_count(), "runs still live after shutdown grace");
                return false;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        true
    }

    fn manual_plans(&self, req: &StartMulti) -> Result<Vec<RunPlan>> {
        if req.manual_pairs.is_empty() {
            return Err(ArenaError::Validation(
                "manual_pairs required for mode manual_pairs".into(),
            ));
        }
        req.manual_pairs
            .iter()
            .map(|pair| {
                let rounds = pair.rounds.unwrap_or(req.rounds);
                let interval =
                    self.validate_plan(rounds, pair.interval_seconds.unwrap_or(req.interval_seconds))?;
                validate_url("attacker_url", &pair.attacker_url)?;
                validate_url("defender_url", &pair.defender_url)?;
                Ok(RunPlan {
                    matchup: Matchup {
                        attacker: Contestant {
                            url: pair.attacker_url.clone(),
                            tool: pick_tool(
                                pair.attacker_tool.as_ref(),
                                req.attacker_tool.as_ref(),
                                &self.attacker_tool,
                            ),
                            model: pair.attacker_model.clone(),
                            capsule_id: None,
                        },
                        defender: Contestant {
                            url: pair.defender_url.clone(),
                            tool: pick_tool(
                                pair.defender_tool.as_ref(),
                                req.defender_tool.as_ref(),
                                &self.defender_tool,
                            ),
                            model: pair.defender_model.clone(),
                            capsule_id: None,
                        },
                    },
                    rounds,
                    interval,
                })
            })
            .collect()
    }

    async fn registry_plans(&self, req: &StartMulti) -> Result<Vec<RunPlan>> {
        let interval = self.validate_plan(req.rounds, req.interval_seconds)?;
        if req.num_matches == 0 {
            return Err(ArenaError::Validation("num_matches must be at least 1".into()));
        }

        let capsules = self.registry.list().await?;
        let of_role = |role: CapsuleRole| -> Vec<Capsule> {
            capsules
                .iter()
                .filter(|c| c.enabled && c.role == role)
                .cloned()
                .collect()
        };
        let attackers = of_role(req.attacker_role);
        let defenders = of_role(req.defender_role);

        let pairs = plan_pairs(&attackers, &defenders, req.num_matches, self.battle.pairing);
        Ok(pairs
            .into_iter()
            .map(|(a, d)| RunPlan {
                matchup: Matchup {
                    attacker: contestant(
                        &attackers[a],
                        req.attacker_tool.clone().unwrap_or_else(|| self.attacker_tool.clone()),
                    ),
                    defender: contestant(
                        &defenders[d],
                        req.defender_tool.clone().unwrap_or_else(|| self.defender_tool.clone()),
                    ),
                },
                rounds: req.rounds,
                interval,
            })
            .collect())
    }

    fn validate_plan(&self, rounds: u32, interval_seconds: f64) -> Result<Duration> {
        if rounds == 0 || rounds > self.battle.max_rounds {
            return Err(ArenaError::Validation(format!(
                "rounds must be between 1 and {}",
                self.battle.max_rounds
            )));
        }
        if !(0.0..=86_400.0).contains(&interval_seconds) {
            return Err(ArenaError::Validation(
                "interval_seconds must be between 0 and 86400".into(),
            ));
        }
        Duration::try_from_secs_f64(interval_seconds)
            .map_err(|e| ArenaError::Validation(format!("interval_seconds: {e}")))
    }

    /// Writes the queued record and claims its table slot.
    /// Draws ids from `next` until one is neither live nor stored.
    async fn unique_run_id(&self, mut next: impl FnMut() -> String) -> Result<String> {
        for _ in 0..RUN_ID_ATTEMPTS {
            let candidate = next();
            if !self.table.is_live(&candidate) && self.store.load(&candidate).await?.is_none() {
                return Ok(candidate);
            }
            debug!(run_id = %candidate, "generated run id already taken, drawing again");
        }
        Ok(Uuid::new_v4().simple().to_string())
    }

    async fn admit(
        &self,
        run_id: &str,
        plan: &RunPlan,
        extra: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(RunHandle, BattleRun)> {
        let handle = self.table.register(run_id)?;
        let mut meta = RunMeta {
            attacker_url: Some(plan.matchup.attacker.url.clone()),
            defender_url: Some(plan.matchup.defender.url.clone()),
            attacker_model: plan.matchup.attacker.model.clone(),
            defender_model: plan.matchup.defender.model.clone(),
            attacker_tool: Some(plan.matchup.attacker.tool.clone()),
            defender_tool: Some(plan.matchup.defender.tool.clone()),
            attacker_id: plan.matchup.attacker.capsule_id.clone(),
            defender_id: plan.matchup.defender.capsule_id.clone(),
            extra,
        };
        meta.absorb_extra();
        let run = BattleRun::queued(run_id.to_owned(), meta);
        self.store.save(&run).await?;
        info!(
            run_id,
            attacker = %plan.matchup.attacker.url,
            defender = %plan.matchup.defender.url,
            rounds = plan.rounds,
            "run queued"
        );
        Ok((handle, run))
    }

    fn spawn(
        &self,
        handle: RunHandle,
        run: BattleRun,
        plan: RunPlan,
        semaphore: Option<Arc<Semaphore>>,
    ) {
        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            let token = handle.token();

            // A stop while waiting for a slot skips straight to `stopped`.
            let _permit = match semaphore {
                Some(semaphore) => {
                    tokio::select! {
                        biased;
                        () = token.cancelled() => None,
                        permit = semaphore.acquire_owned() => permit.ok(),
                    }
                }
                None => None,
            };

            if !token.is_cancelled() {
                handle.activate();
            }
            let run = engine.drive(run, &plan, &token).await;
            info!(run_id = handle.run_id(), status = %run.status, "run task exiting");
            drop(handle);
        });
    }
}

fn contestant(capsule: &Capsule, tool: String) -> Contestant {
    Contestant {
        url: capsule.service_url(),
        tool,
        model: capsule
            .config
            .get("model")
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned),
        capsule_id: Some(capsule.id.clone()),
    }
}

/// Per-pair tool, then the request's, then the configured default.
fn pick_tool(pair: Option<&String>, request: Option<&String>, default: &str) -> String {
    pair.or(request).map_or_else(|| default.to_owned(), Clone::clone)
}

/// Attempts at drawing an unused short id before falling back to a full one.
const RUN_ID_ATTEMPTS: usize = 8;

fn new_run_id() -> String {
    Uuid::new_v4().simple().to_string().chars().take(8).collect()
}

fn validate_run_id(run_id: &str) -> Result<()> {
    let ok = !run_id.is_empty()
        && run_id.len() <= 64
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(ArenaError::Validation(
            "run_id must be 1-64 characters of [A-Za-z0-9_-]".into(),
        ))
    }
}

fn validate_url(field: &str, url: &str) -> Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(ArenaError::Validation(format!(
            "{field} must be an http(s) URL"
        )))
    }
}
