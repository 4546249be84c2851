//! Battle Run Engine: drives one run from `queued` to a terminal state.
//!
//! Rounds execute strictly in sequence. Every transition and every appended
//! round is saved before the next round starts. Cancellation is checked at
//! round boundaries and during the inter-round delay, never mid-call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::model::{BattleRun, RoundError, RunStatus};
use crate::observability::metrics;
use crate::store::RunStore;

use super::executor::{Matchup, RoundExecutor};

/// What a run should do once admitted.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub matchup: Matchup,
    pub rounds: u32,
    pub interval: Duration,
}

/// Drives runs to completion.
pub struct RunEngine {
    store: Arc<dyn RunStore>,
    executor: Arc<RoundExecutor>,
    max_consecutive_failures: u32,
}

impl RunEngine {
    #[must_use]
    pub fn new(
        store: Arc<dyn RunStore>,
        executor: Arc<RoundExecutor>,
        max_consecutive_failures: u32,
    ) -> Self {
        Self {
            store,
            executor,
            max_consecutive_failures: max_consecutive_failures.max(1),
        }
    }

    /// Runs `run` through `plan` and returns the final record.
    ///
    /// Never returns an error: fatal conditions end the run as `failed`.
    pub async fn drive(&self, mut run: BattleRun, plan: &RunPlan, cancel: &CancellationToken) -> BattleRun {
        if cancel.is_cancelled() {
            self.stop_queued(&mut run).await;
            return run;
        }

        let started = Instant::now();
        if let Err(e) = run.transition(RunStatus::Running) {
            error!(run_id = %run.run_id, error = %e, "run cannot start");
            return run;
        }
        metrics::run_started();
        info!(run_id = %run.run_id, rounds = plan.rounds, "run started");

        if let Err(e) = self.store.save(&run).await {
            self.fail(&mut run, &e.to_string(), started).await;
            return run;
        }

        let mut consecutive_failures = 0u32;
        let mut round = run.next_round();
        while round <= plan.rounds {
            if cancel.is_cancelled() {
                break;
            }

            let outcome = self.executor.execute(&plan.matchup, round).await;
            let degraded = outcome.is_degraded();
            for failure in &outcome.failures {
                warn!(run_id = %run.run_id, round, error = %failure, "degraded round");
                run.errors.push(RoundError {
                    round,
                    error: failure.to_string(),
                });
            }
            if let Err(e) = run.push_round(outcome.entry) {
                self.fail(&mut run, &e.to_string(), started).await;
                return run;
            }
            metrics::set_breach_rate(run.breach_rate);

            if let Err(e) = self.store.save(&run).await {
                self.fail(&mut run, &e.to_string(), started).await;
                return run;
            }
            info!(
                run_id = %run.run_id,
                round,
                breach = run.rounds.last().is_some_and(|r| r.breach),
                breach_rate = run.breach_rate,
                "round recorded"
            );

            consecutive_failures = if degraded { consecutive_failures + 1 } else { 0 };
            if consecutive_failures >= self.max_consecutive_failures {
                let reason = format!(
                    "{consecutive_failures} consecutive rounds failed upstream; last error: {}",
                    run.errors.last().map_or("unknown", |e| e.error.as_str())
                );
                self.fail(&mut run, &reason, started).await;
                return run;
            }

            if round < plan.rounds && !plan.interval.is_zero() {
                tokio::select! {
                    () = cancel.cancelled() => {}
                    () = tokio::time::sleep(plan.interval) => {}
                }
            }
            round += 1;
        }

        let status = if cancel.is_cancelled() {
            run.stop_requested = true;
            RunStatus::Stopped
        } else {
            RunStatus::Completed
        };
        self.finish(&mut run, status, started).await;
        run
    }

    /// A run cancelled before admission goes straight to `stopped`.
    pub async fn stop_queued(&self, run: &mut BattleRun) {
        run.stop_requested = true;
        if run.transition(RunStatus::Stopped).is_ok() {
            info!(run_id = %run.run_id, "queued run stopped before start");
            if let Err(e) = self.store.save(run).await {
                error!(run_id = %run.run_id, error = %e, "failed to persist stopped run");
            }
        }
    }

    async fn finish(&self, run: &mut BattleRun, status: RunStatus, started: Instant) {
        if let Err(e) = run.transition(status) {
            error!(run_id = %run.run_id, error = %e, "illegal final transition");
            return;
        }
        metrics::run_finished(status, started.elapsed());
        match self.store.save(run).await {
            Ok(()) => info!(
                run_id = %run.run_id,
                status = %status,
                rounds = run.total_rounds,
                breaches = run.breaches,
                "run finished"
            ),
            Err(e) => {
                // Terminal status is kept in memory; the record on disk lags.
                error!(run_id = %run.run_id, error = %e, "failed to persist final state");
            }
        }
    }

    async fn fail(&self, run: &mut BattleRun, reason: &str, started: Instant) {
        error!(run_id = %run.run_id, reason, "run failed");
        run.failure = Some(reason.to_owned());
        self.finish(run, RunStatus::Failed, started).await;
    }
}

