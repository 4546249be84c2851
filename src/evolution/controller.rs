//! Evolution Controller.
//!
//! Reads a terminal run's aggregates, decides what to mutate and how, and
//! asks the registry to derive the mutant. Mutations of one capsule are
//! exclusive: a second request while one is in flight is rejected.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ArenaError, Result};
use crate::model::{BattleRun, Capsule, CapsuleRole, EvolutionAudit, RunStatus};
use crate::observability::metrics;
use crate::registry::{ATTACK_EXPLORE, CapsuleRegistry, DEFENSE_HARDEN, MutationRequest};
use crate::store::RunStore;

use super::resolve::resolve_target;

const NO_TARGET: &str = "no target capsule found to mutate";

/// Optional overrides for `POST /evolve/{run_id}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EvolveRequest {
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub capsule_id: Option<String>,
    #[serde(default)]
    pub target_role: Option<CapsuleRole>,
}

/// Aggregate view of a run used to score it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub run_id: String,
    pub status: RunStatus,
    pub rounds: u32,
    pub breaches: u32,
    pub breach_rate: f64,
    /// Degraded rounds.
    pub errors: usize,
    /// `1 - breach_rate`, minus a hundredth per degraded round, in `[-1, 1]`.
    pub score: f64,
}

impl Evaluation {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn of(run: &BattleRun) -> Self {
        let errors = run.degraded_rounds();
        let score = ((1.0 - run.breach_rate) - 0.01 * errors as f64).clamp(-1.0, 1.0);
        Self {
            run_id: run.run_id.clone(),
            status: run.status,
            rounds: run.total_rounds,
            breaches: run.breaches,
            breach_rate: run.breach_rate,
            errors,
            score,
        }
    }
}

/// What the controller decided to do with a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub strategy: String,
    pub target_role: CapsuleRole,
    pub target_capsule_id: Option<String>,
    /// Where the target id came from (`request`, `run`, `meta`, `round_1`,
    /// `registry`).
    pub source: Option<&'static str>,
}

/// Applies the decision rule and the target fallback chain.
///
/// Any breach hardens the defender; a clean run pushes the attacker to
/// explore. Explicit request fields win over both.
#[must_use]
pub fn decide(run: &BattleRun, req: &EvolveRequest) -> Decision {
    let breached = run.breach_rate > 0.0;
    let target_role = req.target_role.unwrap_or(if breached {
        CapsuleRole::Defense
    } else {
        CapsuleRole::Attack
    });
    let strategy = req
        .strategy
        .clone()
        .unwrap_or_else(|| (if breached { DEFENSE_HARDEN } else { ATTACK_EXPLORE }).to_owned());

    let (source, target_capsule_id) = match req.capsule_id.as_deref().filter(|id| !id.is_empty()) {
        Some(id) => (Some("request"), Some(id.to_owned())),
        None => match resolve_target(run, target_role) {
            Some((source, id)) => (Some(source), Some(id)),
            None => (None, None),
        },
    };

    Decision {
        strategy,
        target_role,
        target_capsule_id,
        source,
    }
}

/// Response of `POST /evolve/{run_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionResult {
    pub run_id: String,
    pub strategy: String,
    pub target_capsule_id: Option<String>,
    pub target_role: CapsuleRole,
    pub mutated: Option<Capsule>,
    pub evaluation: Evaluation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Per-capsule mutation slots.
#[derive(Debug, Default)]
struct MutationLocks {
    held: DashMap<String, ()>,
}

impl MutationLocks {
    fn acquire(self: &Arc<Self>, key: String) -> Result<MutationGuard> {
        match self.held.entry(key.clone()) {
            Entry::Occupied(_) => Err(ArenaError::MutationInProgress { capsule_id: key }),
            Entry::Vacant(vacant) => {
                vacant.insert(());
                Ok(MutationGuard {
                    locks: Arc::clone(self),
                    key,
                })
            }
        }
    }
}

/// RAII guard releasing a mutation slot on drop.
struct MutationGuard {
    locks: Arc<MutationLocks>,
    key: String,
}

impl Drop for MutationGuard {
    fn drop(&mut self) {
        self.locks.held.remove(&self.key);
    }
}

/// Decides and applies capsule mutations for terminal runs.
pub struct EvolutionController {
    store: Arc<dyn RunStore>,
    registry: Arc<dyn CapsuleRegistry>,
    locks: Arc<MutationLocks>,
    audit: tokio::sync::Mutex<()>,
}

impl EvolutionController {
    #[must_use]
    pub fn new(store: Arc<dyn RunStore>, registry: Arc<dyn CapsuleRegistry>) -> Self {
        Self {
            store,
            registry,
            locks: Arc::new(MutationLocks::default()),
            audit: tokio::sync::Mutex::new(()),
        }
    }

    /// Evaluates and mutates for `run_id`.
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown run or explicit capsule
    /// - `RunNotTerminal` while the run is still queued or running
    /// - `MutationInProgress` if the target is already being mutated
    pub async fn evolve(&self, run_id: &str, req: &EvolveRequest) -> Result<EvolutionResult> {
        let run = self.load_terminal(run_id).await?;
        let evaluation = Evaluation::of(&run);
        let mut decision = decide(&run, req);

        // The guard key is always a concrete capsule id.
        let target_id = match decision.target_capsule_id.clone() {
            Some(id) => id,
            None => match self.registry.select_target(decision.target_role).await? {
                Some(capsule) => {
                    decision.target_capsule_id = Some(capsule.id.clone());
                    decision.source = Some("registry");
                    capsule.id
                }
                None => {
                    return Ok(EvolutionResult {
                        run_id: run_id.to_owned(),
                        strategy: decision.strategy,
                        target_capsule_id: None,
                        target_role: decision.target_role,
                        mutated: None,
                        evaluation,
                        note: Some(NO_TARGET.to_owned()),
                    });
                }
            },
        };
        let guard = self.locks.acquire(target_id.clone())?;

        info!(
            run_id,
            strategy = %decision.strategy,
            target_role = %decision.target_role,
            target = %target_id,
            source = decision.source.unwrap_or("none"),
            "evolving"
        );

        let mutated = self
            .registry
            .mutate(&MutationRequest {
                strategy: decision.strategy.clone(),
                target_capsule_id: Some(target_id),
                target_role: decision.target_role,
                reason: format!("auto-evolved from run {run_id}"),
            })
            .await?;
        drop(guard);

        let target_capsule_id = decision.target_capsule_id.clone();

        let note = match &mutated {
            Some(mutant) => {
                metrics::record_mutation(&decision.strategy);
                self.append_audit(run_id, &decision, target_capsule_id.clone(), Some(mutant.id.clone()))
                    .await;
                None
            }
            None => Some(NO_TARGET.to_owned()),
        };

        Ok(EvolutionResult {
            run_id: run_id.to_owned(),
            strategy: decision.strategy,
            target_capsule_id,
            target_role: decision.target_role,
            mutated,
            evaluation,
            note,
        })
    }

    async fn load_terminal(&self, run_id: &str) -> Result<BattleRun> {
        let run = self
            .store
            .load(run_id)
            .await?
            .ok_or_else(|| ArenaError::run_not_found(run_id))?;
        if !run.status.is_terminal() {
            return Err(ArenaError::RunNotTerminal {
                run_id: run_id.to_owned(),
                status: run.status.to_string(),
            });
        }
        Ok(run)
    }

    /// Records the mutation on the run. Best effort: the mutant already
    /// exists, so a failed write is logged rather than surfaced.
    async fn append_audit(
        &self,
        run_id: &str,
        decision: &Decision,
        target_capsule_id: Option<String>,
        mutated_id: Option<String>,
    ) {
        let _serial = self.audit.lock().await;
        let mut run = match self.store.load(run_id).await {
            Ok(Some(run)) => run,
            Ok(None) => return,
            Err(e) => {
                warn!(run_id, error = %e, "could not reload run for evolution audit");
                return;
            }
        };
        run.evolutions.push(EvolutionAudit {
            at: Utc::now(),
            strategy: decision.strategy.clone(),
            target_role: decision.target_role,
            target_capsule_id,
            mutated_id,
        });
        if let Err(e) = self.store.save(&run).await {
            warn!(run_id, error = %e, "failed to persist evolution audit");
        }
    }
}
