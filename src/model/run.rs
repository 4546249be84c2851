//! Battle run records and their state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ArenaError;

use super::CapsuleRole;

/// Lifecycle state of a battle run.
///
/// `queued → running → {completed, stopped, failed}`. A queued run may also
/// go straight to `stopped` or `failed`. Nothing leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Stopped,
    Failed,
}

impl RunStatus {
    /// Wire name, also used as a metrics label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Failed)
    }

    /// Whether `self → next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Queued => matches!(next, Self::Running | Self::Stopped | Self::Failed),
            Self::Running => matches!(next, Self::Completed | Self::Stopped | Self::Failed),
            Self::Completed | Self::Stopped | Self::Failed => false,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attacker → defender exchange. Written once, never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundEntry {
    pub round: u32,
    pub timestamp: DateTime<Utc>,
    /// `None` when the attacker call failed.
    pub attacker_output: Option<String>,
    /// `None` when the defender was never reached or failed.
    pub defender_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attacker_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defender_prompt: Option<String>,
    pub breach: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attacker_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defender_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attacker_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defender_id: Option<String>,
    /// Set when an upstream failure was absorbed while producing this round.
    #[serde(default)]
    pub degraded: bool,
}

impl RoundEntry {
    /// Capsule id recorded on this round for `role`.
    #[must_use]
    pub fn capsule_id(&self, role: CapsuleRole) -> Option<&str> {
        match role {
            CapsuleRole::Attack => self.attacker_id.as_deref(),
            CapsuleRole::Defense => self.defender_id.as_deref(),
        }
    }
}

/// A degraded round's failure, kept alongside the rounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundError {
    pub round: u32,
    pub error: String,
}

/// Free-form run context. Known keys are typed; anything else is kept as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attacker_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defender_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attacker_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defender_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attacker_tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defender_tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attacker_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defender_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RunMeta {
    /// Capsule id recorded in meta for `role`.
    #[must_use]
    pub fn capsule_id(&self, role: CapsuleRole) -> Option<&str> {
        match role {
            CapsuleRole::Attack => self.attacker_id.as_deref(),
            CapsuleRole::Defense => self.defender_id.as_deref(),
        }
    }

    /// Moves typed keys that arrived through `extra` into their fields.
    ///
    /// A value already set on the typed field wins; the `extra` copy is
    /// dropped either way so the key is never serialized twice.
    pub fn absorb_extra(&mut self) {
        let Self {
            attacker_url,
            defender_url,
            attacker_model,
            defender_model,
            attacker_tool,
            defender_tool,
            attacker_id,
            defender_id,
            extra,
        } = self;
        let slots = [
            ("attacker_url", attacker_url),
            ("defender_url", defender_url),
            ("attacker_model", attacker_model),
            ("defender_model", defender_model),
            ("attacker_tool", attacker_tool),
            ("defender_tool", defender_tool),
            ("attacker_id", attacker_id),
            ("defender_id", defender_id),
        ];
        for (key, slot) in slots {
            if let Some(value) = extra.remove(key) {
                if slot.is_none() {
                    *slot = value.as_str().map(str::to_owned);
                }
            }
        }
    }
}

/// Record of one evolution invocation against a terminal run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvolutionAudit {
    pub at: DateTime<Utc>,
    pub strategy: String,
    pub target_role: CapsuleRole,
    pub target_capsule_id: Option<String>,
    pub mutated_id: Option<String>,
}

/// One multi-round battle between an attacker and a defender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattleRun {
    pub run_id: String,
    #[serde(default)]
    pub attacker_id: Option<String>,
    #[serde(default)]
    pub defender_id: Option<String>,
    pub status: RunStatus,
    #[serde(default)]
    pub rounds: Vec<RoundEntry>,
    #[serde(default)]
    pub total_rounds: u32,
    #[serde(default)]
    pub breaches: u32,
    #[serde(default)]
    pub breach_rate: f64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub task_active: bool,
    #[serde(default)]
    pub stop_requested: bool,
    #[serde(default)]
    pub errors: Vec<RoundError>,
    #[serde(default)]
    pub failure: Option<String>,
    #[serde(default)]
    pub meta: RunMeta,
    #[serde(default)]
    pub evolutions: Vec<EvolutionAudit>,
}

impl BattleRun {
    /// Creates a queued run with no rounds.
    #[must_use]
    pub fn queued(run_id: String, meta: RunMeta) -> Self {
        Self {
            run_id,
            attacker_id: meta.attacker_id.clone(),
            defender_id: meta.defender_id.clone(),
            status: RunStatus::Queued,
            rounds: Vec::new(),
            total_rounds: 0,
            breaches: 0,
            breach_rate: 0.0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            task_active: false,
            stop_requested: false,
            errors: Vec::new(),
            failure: None,
            meta,
            evolutions: Vec::new(),
        }
    }

    /// Moves the run to `next`, stamping start/finish times.
    ///
    /// # Errors
    ///
    /// Returns `ArenaError::Validation` for an illegal transition.
    pub fn transition(&mut self, next: RunStatus) -> Result<(), ArenaError> {
        if !self.status.can_transition_to(next) {
            return Err(ArenaError::Validation(format!(
                "run {}: illegal transition {} -> {}",
                self.run_id, self.status, next
            )));
        }
        let now = Utc::now();
        if next == RunStatus::Running {
            self.started_at = Some(now);
            self.task_active = true;
        }
        if next.is_terminal() {
            self.finished_at = Some(now);
            self.task_active = false;
        }
        self.status = next;
        Ok(())
    }

    /// Appends the next round and recomputes the aggregates.
    ///
    /// # Errors
    ///
    /// Returns `ArenaError::Validation` if the round index is not the next
    /// one in sequence.
    pub fn push_round(&mut self, entry: RoundEntry) -> Result<(), ArenaError> {
        let expected = self.next_round();
        if entry.round != expected {
            return Err(ArenaError::Validation(format!(
                "run {}: expected round {expected}, got {}",
                self.run_id, entry.round
            )));
        }
        self.rounds.push(entry);
        self.recompute();
        Ok(())
    }

    /// Index of the round that would be appended next.
    #[must_use]
    pub fn next_round(&self) -> u32 {
        u32::try_from(self.rounds.len()).map_or(u32::MAX, |n| n.saturating_add(1))
    }

    /// Restores `total_rounds`, `breaches` and `breach_rate` from `rounds`.
    pub fn recompute(&mut self) {
        self.total_rounds = u32::try_from(self.rounds.len()).unwrap_or(u32::MAX);
        self.breaches =
            u32::try_from(self.rounds.iter().filter(|r| r.breach).count()).unwrap_or(u32::MAX);
        self.breach_rate = if self.total_rounds == 0 {
            0.0
        } else {
            f64::from(self.breaches) / f64::from(self.total_rounds)
        };
    }

    /// Number of rounds recorded as degraded.
    #[must_use]
    pub fn degraded_rounds(&self) -> usize {
        self.rounds.iter().filter(|r| r.degraded).count()
    }

    /// Top-level capsule id for `role`.
    #[must_use]
    pub fn capsule_id(&self, role: CapsuleRole) -> Option<&str> {
        match role {
            CapsuleRole::Attack => self.attacker_id.as_deref(),
            CapsuleRole::Defense => self.defender_id.as_deref(),
        }
    }
}

/// Compact listing entry for `GET /battle/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub total_rounds: u32,
    pub breaches: u32,
    pub breach_rate: f64,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attacker_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defender_id: Option<String>,
}

impl From<&BattleRun> for RunSummary {
    fn from(run: &BattleRun) -> Self {
        Self {
            run_id: run.run_id.clone(),
            status: run.status,
            total_rounds: run.total_rounds,
            breaches: run.breaches,
            breach_rate: run.breach_rate,
            created_at: run.created_at,
            attacker_id: run.attacker_id.clone(),
            defender_id: run.defender_id.clone(),
        }
    }
}
