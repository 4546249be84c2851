//! Round Executor: one attacker → defender exchange plus its verdict.
//!
//! Upstream failures never escape a round. Each call is retried with bounded
//! exponential backoff; when every attempt fails the round is still recorded,
//! marked degraded, and the failure is handed back to the run engine.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, warn};

use crate::config::{ExecutorSettings, JudgeFailurePolicy};
use crate::error::{UpstreamError, UpstreamTarget};
use crate::model::RoundEntry;
use crate::observability::metrics;

use super::client::AgentClient;
use super::judge::{Exchange, Judge};

/// One side of a match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contestant {
    pub url: String,
    pub tool: String,
    pub model: Option<String>,
    pub capsule_id: Option<String>,
}

/// The two sides of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matchup {
    pub attacker: Contestant,
    pub defender: Contestant,
}

/// Bounded exponential backoff: `base * 2^(n-1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    /// Delay before the attempt following failed attempt `attempt` (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

impl From<&ExecutorSettings> for RetryPolicy {
    fn from(settings: &ExecutorSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base: Duration::from_millis(settings.backoff_base_ms),
            max: Duration::from_millis(settings.backoff_max_ms),
        }
    }
}

/// A recorded round plus the upstream failures absorbed while producing it.
#[derive(Debug, Clone)]
pub struct RoundOutcome {
    pub entry: RoundEntry,
    pub failures: Vec<UpstreamError>,
}

impl RoundOutcome {
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Executes single rounds against a [`Matchup`].
pub struct RoundExecutor {
    agents: Arc<dyn AgentClient>,
    judge: Arc<dyn Judge>,
    retry: RetryPolicy,
    judge_policy: JudgeFailurePolicy,
}

impl RoundExecutor {
    #[must_use]
    pub fn new(
        agents: Arc<dyn AgentClient>,
        judge: Arc<dyn Judge>,
        retry: RetryPolicy,
        judge_policy: JudgeFailurePolicy,
    ) -> Self {
        Self {
            agents,
            judge,
            retry,
            judge_policy,
        }
    }

    /// Plays round `round`. Never fails; see [`RoundOutcome`].
    pub async fn execute(&self, matchup: &Matchup, round: u32) -> RoundOutcome {
        let started = Instant::now();
        let attacker_prompt = format!("round-{round}");
        let mut failures = Vec::new();

        let mut entry = RoundEntry {
            round,
            timestamp: Utc::now(),
            attacker_output: None,
            defender_output: None,
            attacker_prompt: Some(attacker_prompt.clone()),
            defender_prompt: None,
            breach: false,
            attacker_model: matchup.attacker.model.clone(),
            defender_model: matchup.defender.model.clone(),
            attacker_id: matchup.attacker.capsule_id.clone(),
            defender_id: matchup.defender.capsule_id.clone(),
            degraded: false,
        };

        match self
            .call_agent(UpstreamTarget::Attacker, &matchup.attacker, &attacker_prompt)
            .await
        {
            Ok(attacker_output) => {
                entry.attacker_output = Some(attacker_output.clone());
                entry.defender_prompt = Some(attacker_output.clone());

                match self
                    .call_agent(UpstreamTarget::Defender, &matchup.defender, &attacker_output)
                    .await
                {
                    Ok(defender_output) => {
                        entry.defender_output = Some(defender_output.clone());
                        let exchange = Exchange {
                            round,
                            attacker_prompt,
                            attacker_output,
                            defender_output,
                        };
                        entry.breach = match self
                            .with_retry(UpstreamTarget::Judge, || self.judge.judge(&exchange))
                            .await
                        {
                            Ok(breach) => breach,
                            Err(e) => {
                                let verdict = self.judge_policy.verdict();
                                warn!(round, error = %e, breach = verdict, "judge failed, applying failure policy");
                                failures.push(e);
                                verdict
                            }
                        };
                    }
                    Err(e) => failures.push(e),
                }
            }
            Err(e) => failures.push(e),
        }

        entry.timestamp = Utc::now();
        entry.degraded = !failures.is_empty();
        metrics::record_round(entry.breach, entry.degraded, started.elapsed());

        RoundOutcome { entry, failures }
    }

    async fn call_agent(
        &self,
        target: UpstreamTarget,
        contestant: &Contestant,
        prompt: &str,
    ) -> Result<String, UpstreamError> {
        self.with_retry(target, || {
            self.agents.call_tool(
                target,
                &contestant.url,
                &contestant.tool,
                prompt,
                contestant.model.as_deref(),
            )
        })
        .await
    }

    async fn with_retry<T, F, Fut>(&self, target: UpstreamTarget, mut op: F) -> Result<T, UpstreamError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.retry.max_attempts => {
                    warn!(%target, attempts = attempt, error = %e, "upstream call failed, giving up");
                    metrics::record_upstream_failure(target);
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.retry.backoff(attempt);
                    debug!(%target, attempt, delay_ms = delay.as_millis(), error = %e, "upstream call failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
